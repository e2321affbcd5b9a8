// Stream filter
// Gates the live token stream on a structural answer separator


use crate::config::{ChatConfig, StreamGateMode};

/// When tokens start flowing to the client
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamGate {
    /// Forward every token from the start
    #[default]
    None,
    /// Hold tokens back until the separator has been seen
    Separator(String),
}

impl StreamGate {
    #[inline]
    pub fn from_config(config: &ChatConfig) -> Self {
        match config.stream_gate {
            StreamGateMode::None => Self::None,
            StreamGateMode::Separator => Self::Separator(config.answer_separator.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterState {
    Suppressing { buffer: String },
    Forwarding,
}

#[derive(Debug, Clone)]
pub struct StreamFilter {
    separator: Option<String>,
    state: FilterState,
}

impl StreamFilter {
    #[inline]
    pub fn new(gate: &StreamGate) -> Self {
        match gate {
            StreamGate::Separator(separator) if !separator.is_empty() => Self {
                separator: Some(separator.clone()),
                state: FilterState::Suppressing {
                    buffer: String::new(),
                },
            },
            StreamGate::Separator(_) | StreamGate::None => Self {
                separator: None,
                state: FilterState::Forwarding,
            },
        }
    }

    #[inline]
    pub fn is_forwarding(&self) -> bool {
        self.state == FilterState::Forwarding
    }

    /// Feed one token, returning the text that should reach the client
    #[inline]
    pub fn push(&mut self, token: &str) -> Option<String> {
        let FilterState::Suppressing { buffer } = &mut self.state else {
            return (!token.is_empty()).then(|| token.to_string());
        };

        buffer.push_str(token);

        let separator = self.separator.as_deref()?;
        let remainder = buffer
            .split_once(separator)
            .map(|(_, after)| after.to_string())?;

        self.state = FilterState::Forwarding;
        (!remainder.is_empty()).then_some(remainder)
    }

    /// End of stream. Text still held back is released, since the model
    /// never echoed the separator and it is the whole answer.
    #[inline]
    pub fn finish(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.state, FilterState::Forwarding) {
            FilterState::Suppressing { buffer } if !buffer.is_empty() => Some(buffer),
            _ => None,
        }
    }
}
