use std::borrow::Cow;

/// One chat line on its way from a connection to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub name: String,
    /// Raw line as received, trailing newline included.
    pub payload: Vec<u8>,
}

impl Message {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Join,
    Unrecognized(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    Command(Command),
    Chat,
}

pub fn classify(line: &[u8]) -> Line {
    if !line.starts_with(b"/") {
        return Line::Chat;
    }

    let text = String::from_utf8_lossy(line);

    match text.trim() {
        "/join" => Line::Command(Command::Join),
        other => Line::Command(Command::Unrecognized(other.to_string())),
    }
}
