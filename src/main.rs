//! OpsPilot 命令行入口
//!
//! 用法：opspilot [--config <file>] <command>
//!   tools                      列出可用工具
//!   create <goal...>           创建 Run 并推进到终态或审批暂停
//!   run <id>...                继续一个或多个 Run（并发推进）
//!   approve <id> [reason...]   批准挂起的工具调用并继续
//!   reject <id> [reason...]    拒绝挂起的工具调用（Run 置为 FAILED）
//!   show <id>                  打印 Run 的 Step、ToolCall 与迁移记录
//!   list [status]              列出最近的 Run

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use opspilot::config::load_config;
use opspilot::core::{Orchestrator, OrchestratorBuilder, RunScheduler};
use opspilot::store::RunStatus;

const USAGE: &str = "usage: opspilot [--config <file>] <tools|create|run|approve|reject|show|list> [args]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    opspilot::observability::init("info");

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_config_flag(&mut args)?;
    let Some(command) = args.first().cloned() else {
        bail!(USAGE);
    };
    let rest = &args[1..];

    let cfg = load_config(config_path).context("Failed to load config")?;
    let workers = cfg.agent.workers;
    let orchestrator = Arc::new(
        OrchestratorBuilder::new(cfg)
            .build()
            .context("Failed to build orchestrator")?,
    );

    match command.as_str() {
        "tools" => print_tools(&orchestrator),
        "create" => {
            let goal = rest.join(" ");
            if goal.trim().is_empty() {
                bail!("usage: opspilot create <goal>");
            }
            let run = orchestrator.create_run(&goal)?;
            println!("created run {}", run.id);
            let status = orchestrator.start(run.id).await?;
            print_outcome(run.id, status);
        }
        "run" => {
            let ids = rest
                .iter()
                .map(|s| parse_id(s))
                .collect::<anyhow::Result<Vec<_>>>()?;
            if ids.is_empty() {
                bail!("usage: opspilot run <id>...");
            }
            run_concurrently(Arc::clone(&orchestrator), ids, workers).await?;
        }
        "approve" | "reject" => {
            let Some(id) = rest.first() else {
                bail!("usage: opspilot {command} <id> [reason]");
            };
            let run_id = parse_id(id)?;
            let reason = if rest.len() > 1 {
                rest[1..].join(" ")
            } else {
                "no reason given".to_string()
            };
            let status = orchestrator
                .resume_after_approval(run_id, command == "approve", &reason)
                .await?;
            print_outcome(run_id, status);
        }
        "show" => {
            let Some(id) = rest.first() else {
                bail!("usage: opspilot show <id>");
            };
            show_run(&orchestrator, parse_id(id)?)?;
        }
        "list" => {
            let status = rest
                .first()
                .map(|s| s.parse::<RunStatus>())
                .transpose()
                .context("Unknown status filter")?;
            for run in orchestrator.store().list_runs(status, 50)? {
                println!(
                    "{:>5}  {:<15} {}  {}",
                    run.id,
                    run.status.as_str(),
                    run.created_at.format("%Y-%m-%d %H:%M:%S"),
                    run.goal
                );
            }
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
    Ok(())
}

fn take_config_flag(args: &mut Vec<String>) -> anyhow::Result<Option<PathBuf>> {
    let Some(pos) = args.iter().position(|a| a == "--config") else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("--config requires a path");
    }
    let path = PathBuf::from(args.remove(pos + 1));
    args.remove(pos);
    Ok(Some(path))
}

fn parse_id(raw: &str) -> anyhow::Result<i64> {
    raw.parse::<i64>()
        .with_context(|| format!("invalid run id '{raw}'"))
}

fn print_tools(orchestrator: &Orchestrator) {
    for tool in orchestrator.tools() {
        let gate = if tool.requires_approval { " [requires approval]" } else { "" };
        println!(
            "{} ({}, timeout {}s){}\n    {}",
            tool.name,
            tool.category,
            tool.timeout.as_secs(),
            gate,
            tool.description
        );
    }
}

fn print_outcome(run_id: i64, status: RunStatus) {
    match status {
        RunStatus::NeedsApproval => println!(
            "run {run_id} is waiting for approval: opspilot approve {run_id} | opspilot reject {run_id}"
        ),
        other => println!("run {run_id}: {other}"),
    }
}

fn show_run(orchestrator: &Orchestrator, run_id: i64) -> anyhow::Result<()> {
    let store = orchestrator.store();
    let run = store.get_run(run_id)?;
    println!("run {} [{}]: {}", run.id, run.status, run.goal);
    for step in store.list_steps(run_id)? {
        println!("  step {} ({})", step.step_number, step.state);
        for line in step.reasoning.lines().filter(|l| !l.trim().is_empty()) {
            println!("    {line}");
        }
        for call in store.list_tool_calls(step.id)? {
            println!(
                "    -> {} [{}] inputs={}",
                call.tool_name,
                call.status,
                serde_json::Value::Object(call.inputs.clone())
            );
            if let Some(out) = &call.outputs {
                println!("       outputs={out}");
            }
            if let Some(err) = &call.error_message {
                println!("       error={err}");
            }
        }
    }
    let transitions = store.transitions(run_id)?;
    if !transitions.is_empty() {
        let path: Vec<String> = transitions
            .iter()
            .map(|t| format!("{}:{}->{}", t.step_number, t.from_state, t.to_state))
            .collect();
        println!("  transitions: {}", path.join(", "));
    }
    Ok(())
}

async fn run_concurrently(
    orchestrator: Arc<Orchestrator>,
    ids: Vec<i64>,
    workers: usize,
) -> anyhow::Result<()> {
    let (scheduler, mut notifications) = RunScheduler::new(orchestrator, workers);
    for id in &ids {
        scheduler.submit(*id)?;
    }

    let mut pending = ids.len();
    while pending > 0 {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, stopping scheduler");
                scheduler.shutdown();
                println!("interrupted; progress is saved, use `opspilot run` to continue");
                break;
            }
            Some(n) = notifications.recv() => {
                pending -= 1;
                match n.result {
                    Some(Ok(status)) => print_outcome(n.run_id, status),
                    Some(Err(e)) => println!("run {}: error: {e}", n.run_id),
                    None => println!("run {}: cancelled (progress saved)", n.run_id),
                }
            }
        }
    }
    Ok(())
}
