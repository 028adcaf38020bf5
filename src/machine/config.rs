use std::io;

use crate::machine::streams::{Stream, StreamType};
use crate::machine::Machine;

/// Describes how the standard streams of a [`Machine`] are handled.
#[derive(Default)]
pub struct StreamConfig {
    inner: StreamConfigInner,
}

impl StreamConfig {
    /// Binds the input and output streams to stdin and stdout.
    pub fn stdio() -> Self {
        StreamConfig {
            inner: StreamConfigInner::Stdio,
        }
    }

    /// Binds the input stream to an empty buffer and the output stream to
    /// a memory buffer the host can inspect.
    pub fn in_memory() -> Self {
        StreamConfig {
            inner: StreamConfigInner::Memory,
        }
    }

    pub(crate) fn input_stream(&self, id: u64) -> Stream {
        match self.inner {
            StreamConfigInner::Memory => Stream::from_string(id, ""),
            StreamConfigInner::Stdio => {
                Stream::from_reader(id, Box::new(io::stdin()), StreamType::Text)
            }
        }
    }

    pub(crate) fn output_stream(&self, id: u64) -> Stream {
        match self.inner {
            StreamConfigInner::Memory => Stream::memory_writer(id),
            StreamConfigInner::Stdio => {
                Stream::from_writer(id, Box::new(io::stdout()), StreamType::Text)
            }
        }
    }
}

#[derive(Default)]
enum StreamConfigInner {
    Stdio,
    #[default]
    Memory,
}

/// Describes how a [`Machine`] will be configured.
pub struct MachineBuilder {
    pub(crate) streams: StreamConfig,
    pub(crate) max_variables: u64,
}

impl Default for MachineBuilder {
    /// Defaults to in-memory streams and no variable cap.
    fn default() -> Self {
        MachineBuilder {
            streams: StreamConfig::default(),
            max_variables: 0,
        }
    }
}

impl MachineBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_streams(mut self, streams: StreamConfig) -> Self {
        self.streams = streams;
        self
    }

    /// Caps the number of variables the machine may create; zero means no
    /// limit. Exceeding the cap raises `resource_error(memory)`.
    pub fn with_max_variables(mut self, max: u64) -> Self {
        self.max_variables = max;
        self
    }

    pub fn build(self) -> Machine {
        Machine::from_builder(self)
    }
}
