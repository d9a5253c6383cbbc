use anyhow::{Result, anyhow};
use console::style;
use reqwest::Client;

use super::parse_string_flag;
use crate::core::config::{self, AppConfig};
use crate::core::jobs::ops::INTERNAL_TOKEN_HEADER;
use crate::core::terminal::{GuideSection, print_error, print_success};

/// Run one admin command against a live `tally-cron serve`.
pub async fn run_admin_command(args: &[String]) -> Result<()> {
    let data_dir = parse_string_flag(args, "--data-dir")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(config::data_dir);
    let config = AppConfig::load(&data_dir).await?;
    let plan = build_request_plan(args, config.retention.execution_days)?;
    let (api_url, token) = resolve_target(args, &config);
    let url = format!("{}{}", api_url.trim_end_matches('/'), plan.path);

    let client = Client::new();
    let mut request = match plan.method {
        HttpMethod::Get => client.get(&url),
        HttpMethod::Post => client.post(&url),
        HttpMethod::Patch => client.patch(&url),
        HttpMethod::Delete => client.delete(&url),
    };
    if !plan.query.is_empty() {
        request = request.query(&plan.query);
    }
    if let Some(body) = &plan.body {
        request = request.json(body);
    }
    if let Some(token) = token {
        request = request.header(INTERNAL_TOKEN_HEADER, token);
    }

    let resp = request
        .send()
        .await
        .map_err(|e| anyhow!("tally-cron is not reachable at {}: {}", api_url, e))?;
    let status = resp.status();
    let body = resp.json::<serde_json::Value>().await?;
    let ok = body
        .get("success")
        .and_then(|v| v.as_bool())
        .unwrap_or(status.is_success());

    if !ok {
        let message = body
            .get("error")
            .or_else(|| body.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("request failed");
        print_error(message);
        return Ok(());
    }

    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    match args.get(1).map(String::as_str) {
        Some("jobs") => render_jobs(&body),
        Some("history") => render_history(&body),
        Some("trigger") => print_success(&format!(
            "Execution started: {}",
            body.get("executionId").and_then(|v| v.as_str()).unwrap_or("?")
        )),
        Some("enable") | Some("disable") => print_success(&format!(
            "Cron job {}",
            if args[1] == "enable" { "enabled" } else { "disabled" }
        )),
        Some("cleanup") => print_success(&format!(
            "Deleted {} execution(s)",
            body.get("deleted").and_then(|v| v.as_u64()).unwrap_or(0)
        )),
        _ => {
            GuideSection::new("Result")
                .text(&serde_json::to_string_pretty(&body)?)
                .print();
            println!();
        }
    }
    Ok(())
}

/// API base URL and token: flags first, then the local config.
fn resolve_target(args: &[String], config: &AppConfig) -> (String, Option<String>) {
    (
        parse_string_flag(args, "--api-url").unwrap_or_else(|| config.api_url()),
        parse_string_flag(args, "--token").or_else(|| config.internal_token()),
    )
}

fn render_jobs(body: &serde_json::Value) {
    let empty = Vec::new();
    let jobs = body.get("jobs").and_then(|v| v.as_array()).unwrap_or(&empty);
    let mut section = GuideSection::new("Cron Jobs");
    for job in jobs {
        let name = job.get("name").and_then(|v| v.as_str()).unwrap_or("?");
        let enabled = job.get("isEnabled").and_then(|v| v.as_bool()).unwrap_or(false);
        let schedule = job.get("schedule").and_then(|v| v.as_str()).unwrap_or("");
        let last = job
            .get("latestExecution")
            .and_then(|e| e.get("status"))
            .and_then(|v| v.as_str())
            .unwrap_or("never run");
        let rate = job.get("successRate").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let state = if enabled {
            style("on ").green().to_string()
        } else {
            style("off").dim().to_string()
        };
        section = section.status(
            name,
            &format!("{state}  {schedule:<14} last: {last:<10} success: {rate:.0}%"),
        );
        if let Some(id) = job.get("id").and_then(|v| v.as_str()) {
            section = section.text(&format!("{}", style(id).dim()));
        }
    }
    if jobs.is_empty() {
        section = section.info("No cron jobs registered.");
    }
    section.print();
    println!();
}

fn render_history(body: &serde_json::Value) {
    let empty = Vec::new();
    let rows = body
        .get("executions")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);
    let total = body.get("total").and_then(|v| v.as_u64()).unwrap_or(0);
    let mut section = GuideSection::new(&format!("Executions ({} of {})", rows.len(), total));
    for row in rows {
        let started = row.get("startedAt").and_then(|v| v.as_str()).unwrap_or("?");
        let status = row.get("status").and_then(|v| v.as_str()).unwrap_or("?");
        let source = row.get("triggeredBy").and_then(|v| v.as_str()).unwrap_or("?");
        let duration = row
            .get("durationMs")
            .and_then(|v| v.as_u64())
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        let retry = row.get("retryCount").and_then(|v| v.as_u64()).unwrap_or(0);
        section = section.status(
            started,
            &format!("{status:<10} {source:<9} {duration:>9}  retry {retry}"),
        );
        if let Some(err) = row.get("errorMessage").and_then(|v| v.as_str()) {
            section = section.text(&format!("{}", style(err).red()));
        }
    }
    section.print();
    println!();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestPlan {
    method: HttpMethod,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
}

impl RequestPlan {
    fn get(path: String) -> Self {
        Self {
            method: HttpMethod::Get,
            path,
            query: Vec::new(),
            body: None,
        }
    }
}

fn require_job_id(args: &[String], command: &str) -> Result<String> {
    args.get(2)
        .filter(|a| !a.starts_with("--"))
        .cloned()
        .ok_or_else(|| anyhow!("Usage: tally-cron {} <job-id>", command))
}

const HISTORY_FLAGS: [(&str, &str); 8] = [
    ("--job", "jobId"),
    ("--status", "status"),
    ("--source", "triggeredBy"),
    ("--user", "triggeredByUserId"),
    ("--after", "startedAfter"),
    ("--before", "startedBefore"),
    ("--limit", "limit"),
    ("--offset", "offset"),
];

fn build_request_plan(args: &[String], retention_days: u32) -> Result<RequestPlan> {
    let command = args
        .get(1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing command"))?;

    match command {
        "jobs" => Ok(RequestPlan::get("/api/cron/jobs".to_string())),
        "job" => {
            let id = require_job_id(args, command)?;
            Ok(RequestPlan::get(format!("/api/cron/jobs/{id}")))
        }
        "trigger" => {
            let id = require_job_id(args, command)?;
            let body = parse_string_flag(args, "--user")
                .map(|user| serde_json::json!({ "userId": user }));
            Ok(RequestPlan {
                method: HttpMethod::Post,
                path: format!("/api/cron/jobs/{id}/trigger"),
                query: Vec::new(),
                body,
            })
        }
        "enable" | "disable" => {
            let id = require_job_id(args, command)?;
            let mut body = serde_json::json!({ "isEnabled": command == "enable" });
            if let Some(by) = parse_string_flag(args, "--by") {
                body["modifiedBy"] = serde_json::Value::String(by);
            }
            Ok(RequestPlan {
                method: HttpMethod::Patch,
                path: format!("/api/cron/jobs/{id}"),
                query: Vec::new(),
                body: Some(body),
            })
        }
        "history" => {
            let mut plan = RequestPlan::get("/api/cron/executions".to_string());
            for (flag, param) in HISTORY_FLAGS {
                if let Some(value) = parse_string_flag(args, flag) {
                    plan.query.push((param.to_string(), value));
                }
            }
            Ok(plan)
        }
        "stats" => {
            let mut plan = RequestPlan::get("/api/cron/stats".to_string());
            if let Some(days) = parse_days(args)? {
                plan.query.push(("days".to_string(), days.to_string()));
            }
            Ok(plan)
        }
        "cleanup" => {
            let days = parse_days(args)?.unwrap_or(retention_days);
            Ok(RequestPlan {
                method: HttpMethod::Delete,
                path: "/api/cron/executions".to_string(),
                query: vec![("olderThanDays".to_string(), days.to_string())],
                body: None,
            })
        }
        other => Err(anyhow!("Unknown command: {}", other)),
    }
}

fn parse_days(args: &[String]) -> Result<Option<u32>> {
    parse_string_flag(args, "--days")
        .map(|raw| {
            raw.parse::<u32>()
                .map_err(|_| anyhow!("--days expects a whole number, got '{}'", raw))
        })
        .transpose()
}
