//! CLI command definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};

use closure_core::InstantUnit;
use closure_events::TypeTag;
use closure_timers::AckMode;

/// Delivery execution closure coordinator
#[derive(Parser, Debug)]
#[command(name = "delivery-closure")]
#[command(version)]
#[command(about = "Scans expired delivery-execution timers and force-closes them")]
#[command(
    long_about = "delivery-closure finds delivery executions whose scheduled closing instant has passed, \
                  publishes closure requests for them, and consumes those requests into force-closure results."
)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Log output format
    #[arg(long, env = "CLOSURE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Connection to the store backing timers and topics.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Store URL (e.g. "rocksdb://data/closure", "ws://localhost:8000", "mem://")
    #[arg(long, env = "CLOSURE_STORE_URL")]
    pub store_url: String,

    /// Store namespace
    #[arg(long, env = "CLOSURE_STORE_NS", default_value = "closure")]
    pub store_namespace: String,

    /// Store database
    #[arg(long, env = "CLOSURE_STORE_DB", default_value = "closure")]
    pub store_database: String,

    /// Root user, when the store requires authentication
    #[arg(long, env = "CLOSURE_STORE_USER", requires = "store_password")]
    pub store_user: Option<String>,

    /// Root password
    #[arg(long, env = "CLOSURE_STORE_PASSWORD", requires = "store_user", hide_env_values = true)]
    pub store_password: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find expired timers, delete them, and publish one closure request each
    Scan {
        /// Timer key namespace
        #[arg(long, env = "REDIS_CLOSURE_NAMESPACE")]
        namespace: String,

        /// Topic receiving closure requests
        #[arg(long, env = "CLOSURE_TOPIC_ID")]
        request_topic: String,

        /// Unit of the instants written in timer keys
        #[arg(long, env = "CLOSURE_INSTANT_UNIT", default_value_t = InstantUnit::Nanos)]
        instant_unit: InstantUnit,

        /// Type tag stamped on closure request envelopes
        #[arg(long, env = "CLOSURE_REQUEST_TYPE", default_value = TypeTag::CLOSURE_REQUEST)]
        request_type: String,
    },

    /// Consume closure requests until the idle window elapses
    Consume {
        /// Topic carrying closure requests; not-due requests are requeued here
        #[arg(long, env = "CLOSURE_TOPIC_ID")]
        request_topic: String,

        /// Topic receiving force-closure results
        #[arg(long, env = "RESULT_TOPIC_ID")]
        result_topic: String,

        /// Seconds without a message before the pass stops receiving
        #[arg(long, env = "CLOSURE_IDLE_WINDOW_SECS", default_value_t = 10)]
        idle_window_secs: u64,

        /// Maximum messages handled at once
        #[arg(long, env = "CLOSURE_CONCURRENCY", default_value_t = 16)]
        concurrency: usize,

        /// When messages are acknowledged
        #[arg(long, env = "CLOSURE_ACK_MODE", default_value_t = AckMode::BeforeProcessing)]
        ack_mode: AckMode,

        /// Type tag stamped on result envelopes
        #[arg(long, env = "RESULT_TYPE", default_value = TypeTag::RESULT)]
        result_type: String,
    },

    /// Write one timer key for a delivery execution
    Schedule {
        /// Timer key namespace
        #[arg(long, env = "REDIS_CLOSURE_NAMESPACE")]
        namespace: String,

        /// Delivery execution identifier
        #[arg(long)]
        id: String,

        /// Seconds from now until the delivery execution expires
        #[arg(long, default_value_t = 0, conflicts_with = "at")]
        delay_secs: u64,

        /// Absolute expiry instant, in the instant unit
        #[arg(long)]
        at: Option<i64>,

        /// Unit of the written instant
        #[arg(long, env = "CLOSURE_INSTANT_UNIT", default_value_t = InstantUnit::Nanos)]
        instant_unit: InstantUnit,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_consume_defaults() {
        let cli = Cli::try_parse_from([
            "delivery-closure",
            "--store-url",
            "mem://",
            "consume",
            "--request-topic",
            "requests",
            "--result-topic",
            "results",
        ])
        .unwrap();

        match cli.command {
            Commands::Consume {
                idle_window_secs,
                concurrency,
                ack_mode,
                result_type,
                ..
            } => {
                assert_eq!(idle_window_secs, 10);
                assert_eq!(concurrency, 16);
                assert_eq!(ack_mode, AckMode::BeforeProcessing);
                assert_eq!(result_type, TypeTag::RESULT);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.store.store_namespace, "closure");
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_scan_parses_instant_unit() {
        let cli = Cli::try_parse_from([
            "delivery-closure",
            "--store-url",
            "mem://",
            "scan",
            "--namespace",
            "closure",
            "--request-topic",
            "requests",
            "--instant-unit",
            "seconds",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Commands::Scan {
                instant_unit: InstantUnit::Seconds,
                ..
            }
        ));
    }

    #[test]
    fn test_schedule_rejects_delay_with_at() {
        let parsed = Cli::try_parse_from([
            "delivery-closure",
            "--store-url",
            "mem://",
            "schedule",
            "--namespace",
            "closure",
            "--id",
            "de-1",
            "--delay-secs",
            "5",
            "--at",
            "100",
        ]);
        assert!(parsed.is_err());
    }
}
