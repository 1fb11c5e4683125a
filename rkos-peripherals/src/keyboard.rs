use std::io::{self, BufRead};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

// Thread responsible for turning host stdin lines into decoded
// characters for the kernel's input queue
fn stdin_thread(tx: Sender<char>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        for c in line.chars() {
            if tx.send(c).is_err() {
                return;
            }
        }
        if tx.send('\n').is_err() {
            return;
        }
    }
}

/// Keyboard collaborator: delivers decoded printable characters (the
/// host terminal has already done any scan-code work). Reading happens
/// on a worker thread; the clock loop drains the channel between
/// pulses.
pub struct StdinKeyboard {
    rx: Receiver<char>,
}

impl StdinKeyboard {
    pub fn new() -> StdinKeyboard {
        let (tx, rx) = unbounded();
        thread::spawn(move || stdin_thread(tx));
        StdinKeyboard { rx }
    }

    /// The next decoded character, if one has arrived
    pub fn try_key(&self) -> Option<char> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod keyboard_tests {
    use super::*;

    #[test]
    fn test_channel_delivers_decoded_characters() {
        // Drive the channel directly; the stdin thread is just a
        // producer on the same pair
        let (tx, rx) = unbounded();
        let keyboard = StdinKeyboard { rx };

        tx.send('o').unwrap();
        tx.send('k').unwrap();
        assert_eq!(keyboard.try_key(), Some('o'));
        assert_eq!(keyboard.try_key(), Some('k'));
        assert_eq!(keyboard.try_key(), None);
    }
}
