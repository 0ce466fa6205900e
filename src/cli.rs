use clap::{Parser, Subcommand};
use knot_runtime::Config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Options {
    /// Size of the first heap space, in words.
    #[arg(long, global = true)]
    pub heap_words: Option<usize>,

    /// Hard limit of the heap, in words.
    #[arg(long, global = true)]
    pub max_heap_words: Option<usize>,

    /// Collects before every allocation.
    #[arg(long, global = true)]
    pub gc_stress: bool,

    /// Logs collections and heap growth.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs one of the bundled bytecode programs.
    Bench {
        #[command(subcommand)]
        program: Program,
    },

    /// Lists the builtins and the primitive types.
    Info,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum Program {
    /// A tail recursive countdown.
    Loop {
        #[arg(long, default_value_t = 100_000)]
        depth: i64,
    },

    /// Builds and drops lists to exercise the collector.
    Churn {
        #[arg(long, default_value_t = 1_000)]
        rounds: i64,
    },
}

impl Options {
    pub fn config(&self) -> Config {
        let mut config = Config::default().with_gc_stress(self.gc_stress);
        if let Some(words) = self.heap_words {
            config = config.with_heap_words(words);
        }
        if let Some(words) = self.max_heap_words {
            config = config.with_max_heap_words(words);
        }
        config
    }

    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "knot=info,knot_runtime=debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_map_to_config() {
        let options = Options::parse_from([
            "knot",
            "bench",
            "loop",
            "--depth",
            "10",
            "--heap-words",
            "512",
            "--gc-stress",
        ]);
        let config = options.config();
        assert_eq!(config.heap_words, 512);
        assert!(config.gc_stress);
        assert!(matches!(
            options.command,
            Command::Bench {
                program: Program::Loop { depth: 10 }
            }
        ));
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(Options::parse_from(["knot", "info"]).log_filter(), "warn");
        assert_eq!(Options::parse_from(["knot", "-vv", "info"]).log_filter(), "trace");
    }
}
