//! `steward` - operate an approval-gated analysis orchestrator
//!
//! Executors replay canned outputs from `<results-dir>/<kind>.json`.

use anyhow::{bail, Context};
use clap::builder::PossibleValuesParser;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use steward_core::{Parameters, ProposalId, ProposalRequest, ProposalStatus, StewardConfig};
use steward_engine::{ExecutorSet, Orchestrator, ReplayExecutor};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    let id = || {
        Arg::new("id")
            .required(true)
            .value_parser(value_parser!(i64))
            .help("Proposal id")
    };
    let params = || {
        [
            Arg::new("param")
                .long("param")
                .short('p')
                .action(ArgAction::Append)
                .value_parser(parse_param)
                .help("Parameter as key=value; the value is parsed as JSON, else kept as text"),
            Arg::new("params")
                .long("params")
                .help("Parameters as a JSON object; --param entries are applied on top"),
        ]
    };

    Command::new("steward")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Approval-gated retail analytics orchestration")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("db")
                .long("db")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("SQLite database (overrides config and STEWARD_DB)"),
        )
        .arg(
            Arg::new("results-dir")
                .long("results-dir")
                .global(true)
                .default_value("results")
                .value_parser(value_parser!(PathBuf))
                .help("Directory of canned <kind>.json executor outputs"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("submit")
                .about("Create a PENDING proposal")
                .arg(Arg::new("capability").long("capability").help("Capability name, e.g. StockoutAnalyzer"))
                .arg(Arg::new("intent").long("intent").help("Free-text intent to route"))
                .args(params())
                .arg(Arg::new("creator").long("creator").required(true).help("Who is asking")),
        )
        .subcommand(
            Command::new("approve")
                .about("Approve a PENDING proposal")
                .arg(id())
                .arg(Arg::new("reviewer").long("reviewer").required(true))
                .arg(Arg::new("notes").long("notes")),
        )
        .subcommand(
            Command::new("reject")
                .about("Reject a PENDING proposal")
                .arg(id())
                .arg(Arg::new("reviewer").long("reviewer").required(true))
                .arg(Arg::new("notes").long("notes").required(true)),
        )
        .subcommand(
            Command::new("amend")
                .about("Replace the parameters of a PENDING proposal")
                .arg(id())
                .args(params())
                .arg(Arg::new("actor").long("actor").required(true)),
        )
        .subcommand(Command::new("dispatch").about("Run one dispatch pass"))
        .subcommand(Command::new("serve").about("Dispatch on the poll interval until Ctrl-C"))
        .subcommand(
            Command::new("show")
                .about("Show a proposal with its result, score and improvement cycle")
                .arg(id()),
        )
        .subcommand(
            Command::new("list").about("List proposals").arg(
                Arg::new("status")
                    .long("status")
                    .value_parser(PossibleValuesParser::new(
                        ProposalStatus::ALL.map(ProposalStatus::as_str),
                    )),
            ),
        )
        .subcommand(
            Command::new("audit")
                .about("Show the audit trail of a proposal")
                .arg(id()),
        )
        .subcommand(Command::new("verify-audit").about("Verify the audit hash chain"))
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in {raw:?}"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn collect_params(args: &ArgMatches) -> anyhow::Result<Parameters> {
    let mut params = match args.get_one::<String>("params") {
        Some(text) => match serde_json::from_str(text).context("--params is not valid JSON")? {
            Value::Object(map) => map,
            other => bail!("--params must be a JSON object, got {other}"),
        },
        None => Parameters::new(),
    };
    if let Some(pairs) = args.get_many::<(String, Value)>("param") {
        for (key, value) in pairs.cloned() {
            params.insert(key, value);
        }
    }
    Ok(params)
}

fn proposal_id(args: &ArgMatches) -> ProposalId {
    ProposalId(args.get_one::<i64>("id").copied().unwrap_or_default())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<StewardConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => StewardConfig::load(path)?,
        None => StewardConfig::default().with_env_overrides(),
    };
    let config = match matches.get_one::<PathBuf>("db") {
        Some(db) => config.with_database_path(db),
        None => config,
    };
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let config = load_config(&matches)?;
    let results_dir = matches
        .get_one::<PathBuf>("results-dir")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("results"));
    let executors = ExecutorSet::uniform(Arc::new(ReplayExecutor::new(results_dir)));
    let orchestrator = Orchestrator::open(config, executors)
        .context("failed to open the steward database")?;

    match matches.subcommand() {
        Some(("submit", args)) => {
            let request = ProposalRequest {
                capability: args.get_one::<String>("capability").cloned(),
                intent: args.get_one::<String>("intent").cloned(),
                parameters: collect_params(args)?,
                creator: args.get_one::<String>("creator").cloned().unwrap_or_default(),
            };
            print_json(&orchestrator.submit_proposal(request).await?)?;
        }
        Some(("approve", args)) => {
            let reviewer = args.get_one::<String>("reviewer").map_or("", String::as_str);
            let notes = args.get_one::<String>("notes").map(String::as_str);
            print_json(&orchestrator.approve(proposal_id(args), reviewer, notes).await?)?;
        }
        Some(("reject", args)) => {
            let reviewer = args.get_one::<String>("reviewer").map_or("", String::as_str);
            let notes = args.get_one::<String>("notes").map_or("", String::as_str);
            print_json(&orchestrator.reject(proposal_id(args), reviewer, notes).await?)?;
        }
        Some(("amend", args)) => {
            let actor = args.get_one::<String>("actor").map_or("", String::as_str);
            let params = collect_params(args)?;
            print_json(
                &orchestrator
                    .amend_parameters(proposal_id(args), params, actor)
                    .await?,
            )?;
        }
        Some(("dispatch", _)) => {
            print_json(&orchestrator.dispatch_once().await)?;
        }
        Some(("serve", _)) => {
            orchestrator
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "failed to listen for Ctrl-C");
                    }
                })
                .await;
        }
        Some(("show", args)) => {
            print_json(&orchestrator.get_proposal(proposal_id(args)).await?)?;
        }
        Some(("list", args)) => {
            let status = args
                .get_one::<String>("status")
                .and_then(|s| ProposalStatus::parse(s));
            for proposal in orchestrator.list_proposals(status).await? {
                println!(
                    "{:>6}  {:<10} {:<8} {:<12} {}",
                    proposal.id.0,
                    proposal.status.as_str(),
                    proposal.risk_level.as_str(),
                    proposal.creator.as_str(),
                    proposal.label()
                );
            }
        }
        Some(("audit", args)) => {
            print_json(&orchestrator.audit_trail(proposal_id(args)).await?)?;
        }
        Some(("verify-audit", _)) => {
            let entries = orchestrator.verify_audit_chain().await?;
            println!("audit chain verified: {entries} entries");
        }
        _ => unreachable!("subcommand_required"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn command_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn params_parse_as_json_then_text() {
        assert_eq!(parse_param("days=14").unwrap(), ("days".into(), json!(14)));
        assert_eq!(parse_param("store=28a").unwrap(), ("store".into(), json!("28a")));
        assert_eq!(parse_param("store=\"28\"").unwrap(), ("store".into(), json!("28")));
        assert!(parse_param("days").is_err());
        assert!(parse_param("=3").is_err());
    }

    #[test]
    fn param_flags_override_json_object() {
        let matches = cli()
            .try_get_matches_from([
                "steward",
                "submit",
                "--capability",
                "StockoutAnalyzer",
                "--params",
                r#"{"store": "28", "days": 7}"#,
                "-p",
                "days=14",
                "--creator",
                "dana",
            ])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let params = collect_params(args).unwrap();
        assert_eq!(params.get("days"), Some(&json!(14)));
        assert_eq!(params.get("store"), Some(&json!("28")));
    }

    #[test]
    fn reject_requires_notes() {
        let err = cli()
            .try_get_matches_from(["steward", "reject", "3", "--reviewer", "lee"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
