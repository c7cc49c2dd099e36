//! `--verbose` / `WARDEN_LOG_LEVEL`.
//!
//! Repeating `-v` raises the level one step from `ERROR`. The environment
//! variable takes a level name or its step number.

use clap::{Arg, ArgAction, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names indexed by verbosity step.
const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

fn parse_log_level(level: &str) -> Result<u8, String> {
    let level = level.trim();
    let step = level.parse::<usize>().ok().or_else(|| {
        LEVELS
            .iter()
            .position(|name| name.eq_ignore_ascii_case(level))
    });
    step.filter(|step| *step < LEVELS.len())
        .and_then(|step| u8::try_from(step).ok())
        .ok_or_else(|| format!("invalid log level '{level}', expected one of: {}", LEVELS.join(", ")))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("WARDEN_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(ValueParser::from(parse_log_level)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_steps_map_to_the_same_level() {
        assert_eq!(parse_log_level("error"), Ok(0));
        assert_eq!(parse_log_level("Info"), Ok(2));
        assert_eq!(parse_log_level(" TRACE "), Ok(4));
        assert_eq!(parse_log_level("3"), Ok(3));
    }

    #[test]
    fn unknown_levels_are_rejected() {
        for level in ["verbose", "5", "-1", ""] {
            let err = parse_log_level(level).err().unwrap_or_default();
            assert!(err.contains("invalid log level"), "{level}: {err}");
        }
    }
}
