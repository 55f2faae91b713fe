// CLI client commands: solvers, submit, status, cancel, results, models

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use super::{base_url, connection_error_message, parse_options};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Helper to handle reqwest errors and produce a user-friendly connection error.
fn handle_request_error(err: reqwest::Error, host: &str, port: u16) -> anyhow::Error {
    if err.is_connect() || err.is_timeout() {
        anyhow::anyhow!("{}", connection_error_message(host, port))
    } else {
        anyhow::anyhow!("Request failed: {}", err)
    }
}

fn exit_with_api_error(body: &Value) -> ! {
    let message = body["message"].as_str().unwrap_or("Unknown error");
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

/// GET a JSON document, exiting with the service's message on a non-2xx reply.
async fn get_json(client: &Client, url: &str, host: &str, port: u16) -> anyhow::Result<Value> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    if !status.is_success() {
        exit_with_api_error(&body);
    }
    Ok(body)
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let head: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn number_or_dash(value: &Value) -> String {
    match value.as_f64() {
        Some(v) => format!("{}", v),
        None => "-".to_string(),
    }
}

/// solvelab solvers
pub async fn cmd_solvers(host: &str, port: u16) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/v1/solver/solvers", base_url(host, port));
    let body = get_json(&client, &url, host, port).await?;

    let empty_vec = vec![];
    let solvers = body.as_array().unwrap_or(&empty_vec);

    println!("{:<10}{:<11}{:<22}{}", "NAME", "AVAILABLE", "SUPPORTS", "DESCRIPTION");
    for solver in solvers {
        let supports = solver["supports"]
            .as_array()
            .map(|s| {
                s.iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();
        println!(
            "{:<10}{:<11}{:<22}{}",
            solver["name"].as_str().unwrap_or("?"),
            solver["available"].as_bool().unwrap_or(false),
            supports,
            solver["description"].as_str().unwrap_or("")
        );
    }

    Ok(())
}

/// solvelab submit
#[allow(clippy::too_many_arguments)]
pub async fn cmd_submit(
    host: &str,
    port: u16,
    model_id: i64,
    data_file_id: Option<i64>,
    solver: Option<&str>,
    timeout: Option<u64>,
    option_args: &[String],
    wait: bool,
) -> anyhow::Result<()> {
    let options = parse_options(option_args).map_err(|e| anyhow::anyhow!(e))?;

    let mut request = json!({
        "model_id": model_id,
        "options": options,
    });
    if let Some(id) = data_file_id {
        request["data_file_id"] = json!(id);
    }
    if let Some(s) = solver {
        request["solver"] = json!(s);
    }
    if let Some(t) = timeout {
        request["timeout"] = json!(t);
    }

    let client = Client::new();
    let url = format!("{}/api/v1/solver/run", base_url(host, port));

    let response = client
        .post(&url)
        .json(&request)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    if !status.is_success() {
        exit_with_api_error(&body);
    }

    let job_id = body["job_id"].as_str().unwrap_or("unknown").to_string();
    println!("Solve job queued.");
    println!("  Job:   {}", job_id);
    println!("  Model: {}", model_id);

    if !wait {
        return Ok(());
    }

    let status_url = format!("{}/api/v1/solver/status/{}", base_url(host, port), job_id);
    let snapshot = loop {
        let snapshot = get_json(&client, &status_url, host, port).await?;
        match snapshot["status"].as_str() {
            Some("completed") | Some("failed") | Some("cancelled") => break snapshot,
            _ => tokio::time::sleep(WAIT_POLL_INTERVAL).await,
        }
    };

    print_status(&snapshot);

    if let Some(result_id) = snapshot["result_id"].as_i64() {
        let result_url = format!("{}/api/v1/solver/results/{}", base_url(host, port), result_id);
        let result = get_json(&client, &result_url, host, port).await?;
        println!("  Outcome:   {}", result["status"].as_str().unwrap_or("?"));
        println!("  Objective: {}", number_or_dash(&result["objective_value"]));
        println!("  Time (s):  {}", number_or_dash(&result["solve_time"]));
    }

    if snapshot["status"].as_str() == Some("failed") {
        std::process::exit(1);
    }

    Ok(())
}

fn print_status(snapshot: &Value) {
    println!("Job {}", snapshot["job_id"].as_str().unwrap_or("?"));
    println!("  Status:    {}", snapshot["status"].as_str().unwrap_or("?"));
    if let Some(result_id) = snapshot["result_id"].as_i64() {
        println!("  Result:    {}", result_id);
    }
    if let Some(error) = snapshot["error"].as_str() {
        println!("  Error:     {}", error);
    }
    if !snapshot["progress"].is_null() {
        println!("  Progress:  {}", snapshot["progress"]);
    }
}

/// solvelab status
pub async fn cmd_status(host: &str, port: u16, job_id: &str) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/v1/solver/status/{}", base_url(host, port), job_id);
    let snapshot = get_json(&client, &url, host, port).await?;
    print_status(&snapshot);
    Ok(())
}

/// solvelab cancel
pub async fn cmd_cancel(host: &str, port: u16, job_id: &str) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/v1/solver/cancel/{}", base_url(host, port), job_id);

    let response = client
        .post(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .unwrap_or_else(|_| json!({"message": "Unknown error"}));

    if status.is_success() {
        println!("Cancellation requested for job {}.", job_id);
    } else {
        exit_with_api_error(&body);
    }

    Ok(())
}

/// solvelab results
pub async fn cmd_results(
    host: &str,
    port: u16,
    model_id: Option<i64>,
    skip: usize,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let client = Client::new();
    let mut url = format!(
        "{}/api/v1/solver/results?skip={}&limit={}",
        base_url(host, port),
        skip,
        limit
    );
    if let Some(id) = model_id {
        url.push_str(&format!("&model_id={}", id));
    }

    let body = get_json(&client, &url, host, port).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let empty_vec = vec![];
    let items = body["items"].as_array().unwrap_or(&empty_vec);

    if items.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "{:<8}{:<18}{:<9}{:<12}{:<16}{:<10}",
        "ID", "MODEL", "SOLVER", "STATUS", "OBJECTIVE", "TIME (s)"
    );

    for item in items {
        let model = item["model_name"]
            .as_str()
            .map(|name| truncate(name, 17))
            .unwrap_or_else(|| item["model_id"].to_string());
        println!(
            "{:<8}{:<18}{:<9}{:<12}{:<16}{:<10}",
            item["id"].to_string(),
            model,
            item["solver_name"].as_str().unwrap_or("?"),
            item["status"].as_str().unwrap_or("?"),
            number_or_dash(&item["objective_value"]),
            number_or_dash(&item["solve_time"])
        );
    }

    println!(
        "\nShowing {} of {} result(s).",
        items.len(),
        body["total"].as_u64().unwrap_or(items.len() as u64)
    );

    Ok(())
}

/// solvelab models
pub async fn cmd_models(host: &str, port: u16, json: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/v1/models", base_url(host, port));
    let body = get_json(&client, &url, host, port).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let empty_vec = vec![];
    let models = body.as_array().unwrap_or(&empty_vec);

    if models.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    println!("{:<8}{:<26}{:<8}{:<10}", "ID", "NAME", "TYPE", "TEMPLATE");
    for model in models {
        println!(
            "{:<8}{:<26}{:<8}{:<10}",
            model["id"].to_string(),
            truncate(model["name"].as_str().unwrap_or("?"), 25),
            model["problem_type"].as_str().unwrap_or("-"),
            model["is_template"].as_bool().unwrap_or(false)
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-model-name", 10), "a-very-...");
    }

    #[test]
    fn test_number_or_dash() {
        assert_eq!(number_or_dash(&json!(12.5)), "12.5");
        assert_eq!(number_or_dash(&Value::Null), "-");
    }

    #[tokio::test]
    async fn test_unreachable_service_gives_connection_message() {
        // Bind then drop to get a port nothing is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let err = cmd_status("127.0.0.1", port, "missing")
            .await
            .expect_err("no service");
        assert!(err.to_string().contains("solvelab serve"));
    }
}
