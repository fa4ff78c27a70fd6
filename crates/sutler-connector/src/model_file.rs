//! Channel/port discovery from the runner's model file.
//!
//! The relevant grammar fragment is the `CLIENTSOCK` connection block,
//! terminated by `ENDDEF` or end of input, whose lines have the shape
//! `CHAN {IN|OUT} <channel-name> ... <port>`. Each port must bind exactly
//! one `IN` channel (driven by the runner) and one `OUT` channel (replies
//! to the runner).

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// The channel pair bound to one runner socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub port: u16,
    /// Channel the runner drives (engine input).
    pub input: String,
    /// Channel the engine answers on (engine output).
    pub output: String,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ModelFileError {
    #[error("model has no CLIENTSOCK connection block")]
    #[diagnostic(code(sutler::model::missing_clientsock))]
    MissingClientSock,

    #[error("malformed CHAN line: {message}")]
    #[diagnostic(code(sutler::model::chan_line))]
    ChanLine {
        message: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("'{token}' is not a valid port")]
    #[diagnostic(code(sutler::model::invalid_port))]
    InvalidPort {
        token: String,
        #[label("expected a port number")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("port {port} binds more than one {direction} channel")]
    #[diagnostic(code(sutler::model::duplicate_channel))]
    DuplicateChannel {
        port: u16,
        direction: &'static str,
        #[label("second binding")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("port {port} has no {missing} channel")]
    #[diagnostic(
        code(sutler::model::unpaired_port),
        help("every CLIENTSOCK port needs one CHAN IN and one CHAN OUT line")
    )]
    UnpairedPort { port: u16, missing: &'static str },
}

struct PortChannels {
    port: u16,
    input: Option<String>,
    output: Option<String>,
}

/// Extract the port→(input, output) channel bindings from a model file.
pub fn parse_bindings(source: &str, filename: &str) -> Result<Vec<ChannelBinding>, ModelFileError> {
    let src = || NamedSource::new(filename, source.to_owned());

    let mut ports: Vec<PortChannels> = Vec::new();
    let mut in_block = false;
    let mut saw_block = false;
    let mut offset = 0usize;

    for line in source.lines() {
        let line_span = |text: &str| -> SourceSpan {
            let trimmed_start = offset + (line.len() - line.trim_start().len());
            (trimmed_start, text.trim().len().max(1)).into()
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();

        if !in_block {
            if tokens.contains(&"CLIENTSOCK") {
                in_block = true;
                saw_block = true;
            }
            offset += line.len() + 1;
            continue;
        }
        if tokens.first() == Some(&"ENDDEF") {
            in_block = false;
            offset += line.len() + 1;
            continue;
        }
        if tokens.first() != Some(&"CHAN") {
            offset += line.len() + 1;
            continue;
        }

        if tokens.len() < 4 {
            return Err(ModelFileError::ChanLine {
                message: "expected CHAN {IN|OUT} <channel-name> ... <port>".into(),
                span: line_span(line),
                src: src(),
            });
        }
        let direction = match tokens[1] {
            "IN" => Direction::In,
            "OUT" => Direction::Out,
            other => {
                return Err(ModelFileError::ChanLine {
                    message: format!("direction must be IN or OUT, found '{other}'"),
                    span: line_span(line),
                    src: src(),
                });
            }
        };
        let channel = tokens[2].to_owned();
        let port_token = tokens[tokens.len() - 1];
        let port: u16 = match port_token.parse() {
            Ok(p) => p,
            Err(_) => {
                return Err(ModelFileError::InvalidPort {
                    token: port_token.to_owned(),
                    span: line_span(line),
                    src: src(),
                });
            }
        };

        let pos = match ports.iter().position(|p| p.port == port) {
            Some(pos) => pos,
            None => {
                ports.push(PortChannels {
                    port,
                    input: None,
                    output: None,
                });
                ports.len() - 1
            }
        };
        let entry = &mut ports[pos];
        let slot = match direction {
            Direction::In => &mut entry.input,
            Direction::Out => &mut entry.output,
        };
        if slot.is_some() {
            return Err(ModelFileError::DuplicateChannel {
                port,
                direction: match direction {
                    Direction::In => "IN",
                    Direction::Out => "OUT",
                },
                span: line_span(line),
                src: src(),
            });
        }
        *slot = Some(channel);

        offset += line.len() + 1;
    }

    if !saw_block {
        return Err(ModelFileError::MissingClientSock);
    }

    ports
        .into_iter()
        .map(|p| match (p.input, p.output) {
            (Some(input), Some(output)) => Ok(ChannelBinding {
                port: p.port,
                input,
                output,
            }),
            (None, _) => Err(ModelFileError::UnpairedPort {
                port: p.port,
                missing: "IN",
            }),
            (_, None) => Err(ModelFileError::UnpairedPort {
                port: p.port,
                missing: "OUT",
            }),
        })
        .collect()
}

#[derive(Clone, Copy)]
enum Direction {
    In,
    Out,
}
