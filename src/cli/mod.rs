mod admin;
mod serve;

use anyhow::Result;
use console::style;

use crate::core::config::DEFAULT_API_PORT;
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Service")
        .command("serve", "Run the scheduler and the admin API in the foreground")
        .print();

    GuideSection::new("Jobs")
        .command("jobs", "List cron jobs with their latest run")
        .command("job <id>", "Show one job with recent executions")
        .command("trigger <id>", "Run a job now (--user <id>)")
        .command("enable <id>", "Enable a job (--by <name>)")
        .command("disable <id>", "Disable a job (--by <name>)")
        .print();

    GuideSection::new("History")
        .command(
            "history",
            "List executions (--job, --status, --source, --user, --after, --before, --limit, --offset)",
        )
        .command("stats", "Status breakdown over the last N days (--days N)")
        .command("cleanup", "Delete executions older than N days (--days N)")
        .print();

    GuideSection::new("Common flags")
        .text("--data-dir <path>   Config and database location (default: $TALLY_DATA_DIR)")
        .text("--api-url <url>     Admin API for client commands")
        .text("--token <token>     Internal token for client commands")
        .text("--json              Print raw API responses")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("tally-cron").green()
    );
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().unwrap_or(DEFAULT_API_PORT);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

pub(crate) fn parse_string_flag(args: &[String], flag: &str) -> Option<String> {
    let mut i = 2;
    while i < args.len() {
        if args[i] == flag {
            if i + 1 < args.len() {
                return Some(args[i + 1].clone());
            }
            return None;
        }
        i += 1;
    }
    None
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "serve" => serve::run_serve(&args).await,
        "jobs" | "job" | "trigger" | "enable" | "disable" | "history" | "stats" | "cleanup" => {
            admin::run_admin_command(&args).await
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command: {}", other));
            print_help();
            Ok(())
        }
    }
}
