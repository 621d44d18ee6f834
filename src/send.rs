use crate::error::Result;
use crate::record::ChannelId;

/// Capability to post a message to the remote service.
///
/// Transport is provided by the surrounding client; the mirror only defines
/// the shape of the call.
pub trait Outbound {
    fn send(&self, channel_id: ChannelId, text: &str, suppress_notification: bool) -> Result<()>;
}

/// Forwards sends, forcing `suppress_notification` while ghost mode is on.
///
/// ```
/// use mirrorfold::{GhostSender, Outbound, Result};
/// use std::cell::RefCell;
///
/// #[derive(Default)]
/// struct Recorder(RefCell<Vec<bool>>);
///
/// impl Outbound for Recorder {
///     fn send(&self, _: i64, _: &str, silent: bool) -> Result<()> {
///         self.0.borrow_mut().push(silent);
///         Ok(())
///     }
/// }
///
/// let sender = GhostSender::new(Recorder::default(), true);
/// sender.send(1, "psst", false).unwrap();
/// assert_eq!(*sender.inner().0.borrow(), vec![true]);
/// ```
pub struct GhostSender<O> {
    inner: O,
    ghost_mode: bool,
}

impl<O: Outbound> GhostSender<O> {
    pub fn new(inner: O, ghost_mode: bool) -> Self {
        GhostSender { inner, ghost_mode }
    }

    pub fn set_ghost_mode(&mut self, on: bool) {
        self.ghost_mode = on;
    }

    pub fn ghost_mode(&self) -> bool {
        self.ghost_mode
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<O: Outbound> Outbound for GhostSender<O> {
    fn send(&self, channel_id: ChannelId, text: &str, suppress_notification: bool) -> Result<()> {
        self.inner
            .send(channel_id, text, suppress_notification || self.ghost_mode)
    }
}
