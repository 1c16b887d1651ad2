use crossbeam_channel::{Receiver, Sender};
use std::io::BufRead;
use std::thread;

/// User input for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Toggle,
    Quit,
}

/// Map one line of terminal input to an event. Blank lines and `t` toggle.
pub fn parse_command(line: &str) -> Option<ControlEvent> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "t" | "toggle" => Some(ControlEvent::Toggle),
        "q" | "quit" | "exit" => Some(ControlEvent::Quit),
        _ => None,
    }
}

/// Read control events from stdin on a background thread.
///
/// End of input is reported as [`ControlEvent::Quit`].
pub fn spawn_stdin() -> Receiver<ControlEvent> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("control-input".into())
        .spawn(move || read_commands(std::io::stdin().lock(), &tx))
        .map_err(|e| tracing::warn!("Keyboard control unavailable: {}", e))
        .ok();
    rx
}

fn read_commands<R: BufRead>(input: R, tx: &Sender<ControlEvent>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        match parse_command(&line) {
            Some(event) => {
                if tx.send(event).is_err() || event == ControlEvent::Quit {
                    return;
                }
            }
            None => tracing::warn!("Unknown command {:?}; press Enter to toggle, q to quit", line),
        }
    }
    let _ = tx.send(ControlEvent::Quit);
}
