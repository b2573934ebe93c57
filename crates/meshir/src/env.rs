use std::env;
use std::sync::OnceLock;

static OVERRIDES: OnceLock<EnvOverrides> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// `MESHIR_*` settings that take precedence over loaded compile options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// `MESHIR_DUMP_IR`
    pub dump_ir: bool,
    /// `MESHIR_PASS_STATS`
    pub pass_stats: bool,
    /// `MESHIR_MAX_REWRITE_ITERS`; zero and garbage are ignored.
    pub max_rewrite_iters: Option<usize>,
}

impl EnvOverrides {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |var: &str| lookup(var).is_some_and(|value| parse_bool(&value));
        Self {
            dump_ir: flag("MESHIR_DUMP_IR"),
            pass_stats: flag("MESHIR_PASS_STATS"),
            max_rewrite_iters: lookup("MESHIR_MAX_REWRITE_ITERS")
                .and_then(|value| value.trim().parse::<usize>().ok())
                .filter(|iters| *iters > 0),
        }
    }

    /// The process environment, read once.
    pub fn current() -> Self {
        *OVERRIDES.get_or_init(|| Self::from_lookup(|var| env::var(var).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_convention() {
        for yes in ["1", "true", "YES", " on "] {
            assert!(parse_bool(yes), "{yes}");
        }
        for no in ["0", "false", "off", "2", ""] {
            assert!(!parse_bool(no), "{no}");
        }
    }

    #[test]
    fn lookup_reads_every_variable() {
        let overrides = EnvOverrides::from_lookup(|var| match var {
            "MESHIR_PASS_STATS" => Some("yes".to_string()),
            "MESHIR_MAX_REWRITE_ITERS" => Some(" 12 ".to_string()),
            _ => None,
        });
        assert_eq!(
            overrides,
            EnvOverrides {
                dump_ir: false,
                pass_stats: true,
                max_rewrite_iters: Some(12),
            }
        );
        let zero = EnvOverrides::from_lookup(|_| Some("0".to_string()));
        assert_eq!(zero, EnvOverrides::default());
    }
}
