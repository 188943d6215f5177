//! Plain-text commands accepted by a monitor's listener.
//!
//! One command per connection, whitespace separated:
//!
//! ```text
//! sensor_value <name> <unix_ts> <value|None>
//! pipelinectl_start <pipeline>
//! pipelinectl_stop <pipeline>
//! pipelinectl_restart <pipeline>
//! pipelinectl_silent <pipeline>
//! pipelinectl_active <pipeline>
//! stop
//! ```

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command '{0}'")]
    Unknown(String),

    #[error("'{command}' is missing its {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("'{value}' is not a valid {argument}")]
    InvalidNumber {
        argument: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A reading injected for listening pipelines. `None` marks a failed readout.
    SensorValue {
        name: String,
        timestamp: f64,
        value: Option<f64>,
    },
    Start(String),
    Stop(String),
    Restart(String),
    Silent(String),
    Active(String),
    /// Shut the whole monitor down.
    Shutdown,
}

fn arg<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
    argument: &'static str,
) -> Result<&'a str, CommandParseError> {
    parts
        .next()
        .ok_or(CommandParseError::MissingArgument { command, argument })
}

fn pipeline<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
) -> Result<String, CommandParseError> {
    arg(parts, command, "pipeline").map(str::to_string)
}

fn number(value: &str, argument: &'static str) -> Result<f64, CommandParseError> {
    value
        .parse::<f64>()
        .map_err(|_| CommandParseError::InvalidNumber {
            argument,
            value: value.to_string(),
        })
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let head = parts.next().ok_or(CommandParseError::Empty)?;

        let command = match head {
            "sensor_value" => {
                let name = arg(&mut parts, "sensor_value", "sensor name")?;
                let timestamp = number(arg(&mut parts, "sensor_value", "timestamp")?, "timestamp")?;
                let value = match arg(&mut parts, "sensor_value", "value")? {
                    "None" => None,
                    v => Some(number(v, "value")?),
                };
                Command::SensorValue {
                    name: name.to_string(),
                    timestamp,
                    value,
                }
            }
            "pipelinectl_start" => Command::Start(pipeline(&mut parts, "pipelinectl_start")?),
            "pipelinectl_stop" => Command::Stop(pipeline(&mut parts, "pipelinectl_stop")?),
            "pipelinectl_restart" => Command::Restart(pipeline(&mut parts, "pipelinectl_restart")?),
            "pipelinectl_silent" => Command::Silent(pipeline(&mut parts, "pipelinectl_silent")?),
            "pipelinectl_active" => Command::Active(pipeline(&mut parts, "pipelinectl_active")?),
            "stop" => Command::Shutdown,
            other => return Err(CommandParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SensorValue {
                name,
                timestamp,
                value,
            } => match value {
                Some(v) => write!(f, "sensor_value {} {} {}", name, timestamp, v),
                None => write!(f, "sensor_value {} {} None", name, timestamp),
            },
            Command::Start(p) => write!(f, "pipelinectl_start {}", p),
            Command::Stop(p) => write!(f, "pipelinectl_stop {}", p),
            Command::Restart(p) => write!(f, "pipelinectl_restart {}", p),
            Command::Silent(p) => write!(f, "pipelinectl_silent {}", p),
            Command::Active(p) => write!(f, "pipelinectl_active {}", p),
            Command::Shutdown => f.write_str("stop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_value() {
        let cmd: Command = "sensor_value T1 1700000000.5 3.25".parse().unwrap();
        assert_eq!(
            cmd,
            Command::SensorValue {
                name: "T1".into(),
                timestamp: 1_700_000_000.5,
                value: Some(3.25)
            }
        );
        let cmd: Command = "sensor_value T1 10 None".parse().unwrap();
        assert!(matches!(cmd, Command::SensorValue { value: None, .. }));
    }

    #[test]
    fn test_pipelinectl() {
        assert_eq!(
            "pipelinectl_silent alarm_x".parse::<Command>().unwrap(),
            Command::Silent("alarm_x".into())
        );
        assert_eq!("  stop \n".parse::<Command>().unwrap(), Command::Shutdown);
        assert_eq!(
            Command::Restart("control_v".into()).to_string(),
            "pipelinectl_restart control_v"
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(CommandParseError::Empty));
        assert!(matches!(
            "frobnicate x".parse::<Command>(),
            Err(CommandParseError::Unknown(_))
        ));
        assert!(matches!(
            "pipelinectl_stop".parse::<Command>(),
            Err(CommandParseError::MissingArgument { argument: "pipeline", .. })
        ));
        assert!(matches!(
            "sensor_value T1 abc 1".parse::<Command>(),
            Err(CommandParseError::InvalidNumber { argument: "timestamp", .. })
        ));
    }
}
