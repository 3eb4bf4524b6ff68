use super::*;

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["trendbot-cli"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn parses_db_ping_command() {
    let cli = Cli::try_parse_from(["trendbot-cli", "db", "ping"]).expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Ping
        })
    ));
}

#[test]
fn run_defaults_to_configured_values() {
    let cli = Cli::try_parse_from(["trendbot-cli", "run"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Run {
            min_score: None,
            top_k: None,
            ephemeral: false,
            ref communities,
        }) if communities.is_empty()
    ));
}

#[test]
fn run_accepts_overrides() {
    let cli = Cli::try_parse_from([
        "trendbot-cli",
        "run",
        "--min-score",
        "75.5",
        "--community",
        "rust",
        "--community",
        "programming",
        "--top-k",
        "2",
        "--ephemeral",
    ])
    .unwrap();
    let Some(Commands::Run {
        min_score,
        communities,
        top_k,
        ephemeral,
    }) = cli.command
    else {
        panic!("expected run command");
    };
    assert!(ephemeral);
    let overrides = build_overrides(min_score, communities, top_k);
    assert_eq!(overrides.min_score, Some(75.5));
    assert_eq!(
        overrides.communities,
        Some(vec!["rust".to_owned(), "programming".to_owned()])
    );
    assert_eq!(overrides.top_k, Some(2));
}

#[test]
fn empty_community_list_means_no_override() {
    let overrides = build_overrides(None, Vec::new(), None);
    assert_eq!(overrides, RunOverrides::default());
}

#[test]
fn parses_runs_recent_with_limit() {
    let cli = Cli::try_parse_from(["trendbot-cli", "runs", "recent", "--limit", "3"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Runs {
            command: RunsCommands::Recent { limit: 3 }
        })
    ));
}

#[test]
fn runs_show_requires_a_uuid() {
    let id = Uuid::new_v4();
    let raw = id.to_string();
    let cli = Cli::try_parse_from(["trendbot-cli", "runs", "show", raw.as_str()]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Runs {
            command: RunsCommands::Show { id: parsed }
        }) if parsed == id
    ));
    assert!(Cli::try_parse_from(["trendbot-cli", "runs", "show", "not-a-uuid"]).is_err());
}

#[test]
fn stats_defaults_to_a_day() {
    let cli = Cli::try_parse_from(["trendbot-cli", "stats"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Stats {
            hours: 24,
            json: false
        })
    ));
}

#[test]
fn parses_collect_metrics() {
    let cli = Cli::try_parse_from(["trendbot-cli", "collect-metrics"]).unwrap();
    assert!(matches!(cli.command, Some(Commands::CollectMetrics)));
}
