// Typing activity bridge: local composing activity becomes debounced
// outbound typing_indicator events; the counterpart's events become an
// ephemeral flag the display layer reads. Nothing here is persisted.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use log::debug;

use super::{ChatClient, ClientEvent};
use crate::error::ChatError;

const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Tracks one input cycle of the local composer. `note_composing` is
/// called per keystroke and decides when a typing signal actually goes
/// out; `finish_cycle` closes the cycle when the message is transmitted
/// or the input is abandoned.
#[derive(Debug)]
pub struct TypingSignaler {
    composing: bool,
    last_signal: Option<Instant>,
    debounce: Duration,
}

impl Default for TypingSignaler {
    fn default() -> Self {
        TypingSignaler::new()
    }
}

impl TypingSignaler {
    pub fn new() -> Self {
        TypingSignaler {
            composing: false,
            last_signal: None,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(debounce: Duration) -> Self {
        TypingSignaler {
            debounce,
            ..TypingSignaler::new()
        }
    }

    /// Local keystroke. Returns true when a `typing_indicator {true}`
    /// should be emitted: the first keystroke of a cycle, or a refresh
    /// after the debounce window elapsed.
    pub fn note_composing(&mut self) -> bool {
        let now = Instant::now();
        if self.composing {
            if let Some(last) = self.last_signal {
                if now.duration_since(last) < self.debounce {
                    return false;
                }
            }
        }
        self.composing = true;
        self.last_signal = Some(now);
        true
    }

    /// The input cycle is over. Returns true when a stop signal should be
    /// emitted, which is the case only if a start signal went out earlier
    /// in this cycle.
    pub fn finish_cycle(&mut self) -> bool {
        let was_composing = self.composing;
        self.composing = false;
        self.last_signal = None;
        was_composing
    }

    pub fn is_composing(&self) -> bool {
        self.composing
    }
}

impl ChatClient {
    /// Local input activity. Emits a debounced typing signal on the
    /// channel; quiet when the channel is down (typing is cosmetic, not
    /// worth surfacing an error for).
    pub async fn note_composing(&self) -> Result<(), ChatError> {
        let should_signal = self.signaler.lock().await.note_composing();
        if !should_signal {
            return Ok(());
        }
        match self
            .send_event(&ClientEvent::TypingIndicator { is_typing: true })
            .await
        {
            Ok(()) => Ok(()),
            Err(ChatError::NotConnected) => {
                debug!("skipping typing signal, channel not connected");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Close the current input cycle, emitting the stop signal if one is
    /// owed. Called internally before a message is transmitted so the
    /// signal never trails the send.
    pub async fn finish_typing_cycle(&self) {
        let owes_stop = self.signaler.lock().await.finish_cycle();
        if owes_stop {
            if let Err(e) = self
                .send_event(&ClientEvent::TypingIndicator { is_typing: false })
                .await
            {
                debug!("stop-typing signal not delivered: {}", e);
            }
        }
    }

    /// Whether the counterpart is currently composing. Reset to false
    /// when the channel closes.
    pub fn counterpart_typing(&self) -> bool {
        self.counterpart_typing.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_keystroke_signals() {
        let mut signaler = TypingSignaler::new();
        assert!(signaler.note_composing());
        assert!(signaler.is_composing());
    }

    #[test]
    fn keystrokes_inside_debounce_window_stay_quiet() {
        let mut signaler = TypingSignaler::with_debounce(Duration::from_secs(60));
        assert!(signaler.note_composing());
        assert!(!signaler.note_composing());
        assert!(!signaler.note_composing());
    }

    #[test]
    fn debounce_window_elapsing_signals_again() {
        let mut signaler = TypingSignaler::with_debounce(Duration::from_millis(0));
        assert!(signaler.note_composing());
        assert!(signaler.note_composing());
    }

    #[test]
    fn finish_cycle_owes_stop_only_after_start() {
        let mut signaler = TypingSignaler::with_debounce(Duration::from_secs(60));
        assert!(!signaler.finish_cycle());
        signaler.note_composing();
        assert!(signaler.finish_cycle());
        // Cycle closed: nothing further owed until composing resumes.
        assert!(!signaler.finish_cycle());
    }
}
