//! Reading a passport from start to finish.
//!
//! A session runs a fixed list of steps in order: select the eMRTD application, perform Basic
//! Access Control, then select, read and parse DG2 and DG11 over Secure Messaging. Observers
//! receive [`SessionEvent`]s; a [`CancelToken`] stops the session between steps.


use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use rand::{CryptoRng, RngCore};
use tracing::{debug, info, instrument, warn};

use crate::bac::BacHandshake;
use crate::config::ReaderConfig;
use crate::dg11::{self, PersonalDetails};
use crate::dg2::{self, FacialImage};
use crate::error::{Error, ErrorKind};
use crate::files::{self, DataGroupFile, DataGroupId, ReadError};
use crate::iso7816::card::{SmartCard, TracingCard};
use crate::mrz::MrzIdentity;
use crate::secure_messaging::SecureChannel;


/// The steps of a session, in the order they run.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Step {
    SelectApplication,
    RequestChallenge,
    MutualAuthenticate,
    SelectFacialImage,
    ReadFacialImage,
    ParseFacialImage,
    SelectPersonalDetails,
    ReadPersonalDetails,
    ParsePersonalDetails,
}
impl Step {
    pub const ALL: [Self; 9] = [
        Self::SelectApplication,
        Self::RequestChallenge,
        Self::MutualAuthenticate,
        Self::SelectFacialImage,
        Self::ReadFacialImage,
        Self::ParseFacialImage,
        Self::SelectPersonalDetails,
        Self::ReadPersonalDetails,
        Self::ParsePersonalDetails,
    ];

    /// The data group this step works on, if any.
    pub const fn data_group(&self) -> Option<DataGroupId> {
        match self {
            Self::SelectApplication|Self::RequestChallenge|Self::MutualAuthenticate => None,
            Self::SelectFacialImage|Self::ReadFacialImage|Self::ParseFacialImage => Some(DataGroupId::Dg2),
            Self::SelectPersonalDetails|Self::ReadPersonalDetails|Self::ParsePersonalDetails => Some(DataGroupId::Dg11),
        }
    }
}
impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SelectApplication => "select application",
            Self::RequestChallenge => "request challenge",
            Self::MutualAuthenticate => "mutual authentication",
            Self::SelectFacialImage => "select facial image",
            Self::ReadFacialImage => "read facial image",
            Self::ParseFacialImage => "parse facial image",
            Self::SelectPersonalDetails => "select personal details",
            Self::ReadPersonalDetails => "read personal details",
            Self::ParsePersonalDetails => "parse personal details",
        };
        f.write_str(name)
    }
}


/// What a session has read from the chip.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionResult {
    pub facial_image: Option<FacialImage>,
    pub personal_details: Option<PersonalDetails>,
}


#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The session has started talking to the chip.
    Ready,

    /// The fraction of steps completed, between 0 and 1.
    Progress(f64),

    Failed(ErrorKind),
    Completed(SessionResult),
}


/// Requests a running session to stop before its next step.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}


/// How far the connection to the chip has progressed.
enum Link<SC> {
    Plain(TracingCard<SC>),
    Challenged(TracingCard<SC>, BacHandshake),
    Secure(SecureChannel<TracingCard<SC>>),
}

/// Everything a session carries from one step to the next.
struct PipelineState<SC> {
    link: Link<SC>,
    selected: Option<DataGroupId>,
    pending: Option<DataGroupFile>,
    result: SessionResult,
}


/// Reads the face and personal details from an eMRTD.
#[derive(Debug, Default)]
pub struct PassportReader {
    config: ReaderConfig,
    events: Option<Sender<SessionEvent>>,
    cancel: CancelToken,
}
impl PassportReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config, events: None, cancel: CancelToken::new() }
    }

    /// Sends session events to the given channel.
    pub fn with_events(mut self, sender: Sender<SessionEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub const fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// A token that cancels sessions run by this reader.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(sender) = &self.events {
            // nobody listening is fine
            let _ = sender.send(event);
        }
    }

    /// Runs a whole session against the chip.
    ///
    /// Keys and counters are dropped, and thereby zeroized, whenever this returns.
    #[instrument(skip_all)]
    pub fn run<SC: SmartCard, R: RngCore + CryptoRng>(
        &self,
        card: SC,
        identity: &MrzIdentity,
        rng: &mut R,
    ) -> Result<SessionResult, Error> {
        self.emit(SessionEvent::Ready);

        let mut state = PipelineState {
            link: Link::Plain(TracingCard::new(card)),
            selected: None,
            pending: None,
            result: SessionResult::default(),
        };
        for (index, step) in Step::ALL.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(%step, "session cancelled");
                return Err(self.fail(Error::Cancelled));
            }
            debug!(%step, "running step");
            state = match self.run_step(step, state, identity, rng) {
                Ok(state) => state,
                Err(e) => {
                    warn!(%step, "step failed: {}", e);
                    return Err(self.fail(e));
                },
            };
            self.emit(SessionEvent::Progress((index + 1) as f64 / Step::ALL.len() as f64));
        }

        let result = state.result;
        self.emit(SessionEvent::Completed(result.clone()));
        Ok(result)
    }

    fn fail(&self, error: Error) -> Error {
        self.emit(SessionEvent::Failed(error.kind()));
        error
    }

    fn run_step<SC: SmartCard, R: RngCore + CryptoRng>(
        &self,
        step: Step,
        mut state: PipelineState<SC>,
        identity: &MrzIdentity,
        rng: &mut R,
    ) -> Result<PipelineState<SC>, Error> {
        let out_of_order = || Error::StepOutOfOrder { step };
        match step {
            Step::SelectApplication => {
                let Link::Plain(card) = &mut state.link else { return Err(out_of_order()) };
                files::select_application(card)?;
            },
            Step::RequestChallenge => {
                let Link::Plain(mut card) = state.link else { return Err(out_of_order()) };
                let mut handshake = BacHandshake::new(identity);
                handshake.request_challenge(&mut card)?;
                return Ok(PipelineState { link: Link::Challenged(card, handshake), ..state });
            },
            Step::MutualAuthenticate => {
                let Link::Challenged(mut card, mut handshake) = state.link else { return Err(out_of_order()) };
                let established = handshake.authenticate(&mut card, rng)?;
                let messaging = established.into_secure_messaging(self.config.secure_messaging);
                return Ok(PipelineState { link: Link::Secure(SecureChannel::new(card, messaging)), ..state });
            },
            Step::SelectFacialImage|Step::SelectPersonalDetails => {
                let Link::Secure(channel) = &mut state.link else { return Err(out_of_order()) };
                let Some(file) = step.data_group() else { return Err(out_of_order()) };
                match files::select_file(channel, file) {
                    Ok(()) => state.selected = Some(file),
                    Err(ReadError::FileNotFound { .. }) if self.config.skip_missing_files => {
                        warn!(%file, "file not present, skipping");
                        state.selected = None;
                    },
                    Err(e) => return Err(e.into()),
                }
            },
            Step::ReadFacialImage|Step::ReadPersonalDetails => {
                let Link::Secure(channel) = &mut state.link else { return Err(out_of_order()) };
                if let Some(file) = state.selected.take() {
                    state.pending = Some(files::read_selected(channel, file, self.config.max_read_length)?);
                }
            },
            Step::ParseFacialImage => {
                if let Some(file) = state.pending.take() {
                    state.result.facial_image = Some(dg2::parse(file.data())?);
                }
            },
            Step::ParsePersonalDetails => {
                if let Some(file) = state.pending.take() {
                    state.result.personal_details = Some(dg11::parse(file.data())?);
                }
            },
        }
        Ok(state)
    }
}
