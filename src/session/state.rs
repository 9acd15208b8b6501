//! Session State
//!
//! One value describing what the participant sees: the modal phase, the
//! submission step list and an optional cosmetic display hint. Only the
//! pipeline's transitions below change it; nothing here drives control
//! flow.

use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::canvas::tile::ImageRef;

/// Progress of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Running now.
    Processing,
    /// Not started.
    Queued,
    /// Done.
    Complete,
    /// Stopped with an error.
    Failed,
}

/// A labelled pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionStep {
    /// Step status.
    pub status: StepStatus,
    /// Text shown to the participant.
    pub label: String,
}

impl SubmissionStep {
    fn new(status: StepStatus, label: &str) -> Self {
        Self { status, label: label.to_string() }
    }
}

/// Which modal is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ModalPhase {
    /// No modal.
    Idle,
    /// Confirming erase of the current drawing.
    ConfirmErase,
    /// Submission in progress.
    Processing,
    /// Someone else filled the tile first.
    Conflict {
        /// Image that holds the tile.
        existing: ImageRef,
    },
    /// Tile placed; `completed_canvas` when it was the last one.
    Succeeded {
        /// This submission completed (and minted) the canvas.
        completed_canvas: bool,
    },
    /// Submission stopped.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

/// Cosmetic effect scheduled by a display delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayEffect {
    /// Show the processing modal.
    OpenProcessingModal,
    /// Close the modal and move to the gallery.
    CloseAndRedirect,
}

/// "Apply `effect` after `after`"; purely presentational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayHint {
    /// Delay before the effect.
    pub after: Duration,
    /// The effect.
    pub effect: DisplayEffect,
}

/// Cosmetic display delays.
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Delay before the processing modal opens.
    pub chained_modal_delay: Duration,
    /// Delay before leaving after a tile is placed.
    pub completion_redirect_delay: Duration,
    /// Delay before leaving after a canvas is minted.
    pub mint_redirect_delay: Duration,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            chained_modal_delay: Duration::from_millis(500),
            completion_redirect_delay: Duration::from_secs(3),
            mint_redirect_delay: Duration::from_secs(4),
        }
    }
}

const PROVING: &str = "Generating zero knowledge proof";
const PROVED: &str = "Generated zero knowledge proof";
const SUBMIT_QUEUED: &str = "Verify ZKP membership and submit transaction";
const SUBMITTING: &str = "Verifying ZKP membership and submitting transaction";
const SUBMITTED: &str = "Verified ZKP membership and submitted transaction";
const PLACE: &str = "Add art to active canvas";
const PLACED: &str = "Your drawing is live on an active canvas!";
const MINTING: &str = "Your drawing completed the canvas, minting it";
const MINTED: &str = "Your drawing completed a canvas! Check out your freshly-baked creation.";

/// Everything the participant UI renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Current modal.
    pub modal: ModalPhase,
    /// Submission steps, in order.
    pub steps: Vec<SubmissionStep>,
    /// Pending cosmetic effect.
    pub hint: Option<DisplayHint>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            modal: ModalPhase::Idle,
            steps: Vec::new(),
            hint: None,
        }
    }
}

impl SessionState {
    /// Open the erase confirmation.
    pub fn request_erase(&mut self) {
        if self.modal == ModalPhase::Idle {
            self.modal = ModalPhase::ConfirmErase;
        }
    }

    /// Close the erase confirmation.
    pub fn close_erase(&mut self) {
        if self.modal == ModalPhase::ConfirmErase {
            self.modal = ModalPhase::Idle;
        }
    }

    /// Dismiss a finished modal.
    pub fn dismiss(&mut self) {
        if self.modal != ModalPhase::Processing {
            *self = Self::default();
        }
    }

    pub(crate) fn begin_submission(&mut self, display: &DisplayConfig) {
        self.modal = ModalPhase::Processing;
        self.steps = vec![
            SubmissionStep::new(StepStatus::Processing, PROVING),
            SubmissionStep::new(StepStatus::Queued, SUBMIT_QUEUED),
            SubmissionStep::new(StepStatus::Queued, PLACE),
        ];
        self.hint = Some(DisplayHint {
            after: display.chained_modal_delay,
            effect: DisplayEffect::OpenProcessingModal,
        });
    }

    pub(crate) fn proof_generated(&mut self) {
        self.steps = vec![
            SubmissionStep::new(StepStatus::Complete, PROVED),
            SubmissionStep::new(StepStatus::Processing, SUBMITTING),
            SubmissionStep::new(StepStatus::Queued, PLACE),
        ];
    }

    pub(crate) fn tile_accepted(&mut self, completed_canvas: bool, display: &DisplayConfig) {
        if completed_canvas {
            self.steps = vec![
                SubmissionStep::new(StepStatus::Complete, PROVED),
                SubmissionStep::new(StepStatus::Complete, SUBMITTED),
                SubmissionStep::new(StepStatus::Processing, MINTING),
            ];
        } else {
            self.steps = vec![
                SubmissionStep::new(StepStatus::Complete, PROVED),
                SubmissionStep::new(StepStatus::Complete, SUBMITTED),
                SubmissionStep::new(StepStatus::Complete, PLACED),
            ];
            self.modal = ModalPhase::Succeeded { completed_canvas: false };
            self.hint = Some(DisplayHint {
                after: display.completion_redirect_delay,
                effect: DisplayEffect::CloseAndRedirect,
            });
        }
    }

    pub(crate) fn minted(&mut self, display: &DisplayConfig) {
        self.steps = vec![
            SubmissionStep::new(StepStatus::Complete, PROVED),
            SubmissionStep::new(StepStatus::Complete, SUBMITTED),
            SubmissionStep::new(StepStatus::Complete, MINTED),
        ];
        self.modal = ModalPhase::Succeeded { completed_canvas: true };
        self.hint = Some(DisplayHint {
            after: display.mint_redirect_delay,
            effect: DisplayEffect::CloseAndRedirect,
        });
    }

    pub(crate) fn conflict(&mut self, existing: ImageRef) {
        self.fail_running_step();
        self.modal = ModalPhase::Conflict { existing };
        self.hint = None;
    }

    pub(crate) fn failed(&mut self, reason: String) {
        self.fail_running_step();
        self.modal = ModalPhase::Failed { reason };
        self.hint = None;
    }

    fn fail_running_step(&mut self) {
        if let Some(step) = self.steps.iter_mut().find(|s| s.status == StepStatus::Processing) {
            step.status = StepStatus::Failed;
        }
    }

    /// Step currently running.
    pub fn active_step(&self) -> Option<&SubmissionStep> {
        self.steps.iter().find(|s| s.status == StepStatus::Processing)
    }
}
