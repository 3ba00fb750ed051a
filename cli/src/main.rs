use std::io::Write;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

use mutaprobe_core::core::engine::validate_config;
use mutaprobe_core::utils::write_atomic;
use mutaprobe_core::{
    parse_custom_headers, read_lines, ConsoleSink, EngineConfig, HttpMethod, HttpRequest,
    MutationCatalog, MutationTestService, Report, RunEventSink, RunStatus, SinkRef, TestRequest,
    TestResult, TestStatus,
};

#[derive(Parser, Debug)]
#[command(
    name = "mutaprobe",
    version,
    about = "Mutation-based robustness tester for JSON HTTP APIs",
    override_usage = "mutaprobe <url>  <options>",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  GET with query params:          mutaprobe \"http://api.test/items?page=1\"
  POST a JSON payload:            mutaprobe http://api.test/users -X POST -d '{\"name\":\"Alice\",\"age\":30}'
  Auth header + report file:      mutaprobe http://api.test/me -H \"Authorization: Bearer TOKEN\" -o me.json
  Through a proxy (Burp):         mutaprobe http://api.test/users --proxy http://127.0.0.1:8080 --insecure
  Request from file:              mutaprobe --config request.json
  Same request, many URLs:        mutaprobe -l urls.txt -X POST -d '{\"id\":1}'
  Preview the mutation catalog:   mutaprobe http://api.test/users -X POST -d '{\"a\":1}' --dry-run"
)]
pub struct Args {
    #[arg(required_unless_present_any = ["list", "config"])]
    pub url: Option<String>,

    #[arg(short = 'X', long, default_value = "GET", help = "HTTP method: GET, POST, PUT, PATCH or DELETE")]
    pub method: HttpMethod,

    #[arg(short = 'H', long = "header", help = "Request header (e.g. \"Authorization: Bearer TOKEN\")")]
    pub headers: Vec<String>,

    #[arg(short = 'd', long = "data", help = "JSON request payload")]
    pub data: Option<String>,

    #[arg(long, default_value_t = mutaprobe_core::DEFAULT_TIMEOUT_MS, help = "Per-request timeout in milliseconds")]
    pub timeout: u64,

    #[arg(short = 'c', long, help = "Mutation requests in flight per test")]
    pub concurrency: Option<usize>,

    #[arg(short = 'o', long, default_value = "mutaprobe_report.json", help = "Output file for the JSON report")]
    pub output: String,

    #[arg(long, help = "Read the test request (url, method, headers, payload, timeout) from a JSON file")]
    pub config: Option<String>,

    #[arg(long = "engine-config", help = "Engine settings JSON file (concurrency, catalog, anomaly thresholds)")]
    pub engine_config: Option<String>,

    #[arg(short = 'l', long = "list", help = "File containing target URLs (one per line)")]
    pub list: Option<String>,

    #[arg(long, help = "Proxy URL (e.g. http://127.0.0.1:8080)")]
    pub proxy: Option<String>,

    #[arg(long, default_value_t = false, help = "Accept invalid TLS certificates")]
    pub insecure: bool,

    #[arg(long, help = "Print the mutation catalog without sending requests")]
    pub dry_run: bool,

    #[arg(short = 'v', long, default_value_t = false, help = "Show every result and debug logs")]
    pub verbose: bool,

    #[arg(long, default_value_t = false, help = "Disable the progress bar")]
    pub no_progress: bool,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "warn" }),
    )
    .format_timestamp(None)
    .init();

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprint!("{}\r\n", format!("[!] {:#}", e).red());
            process::exit(2);
        }
    }
}

/// Returns whether every test completed.
async fn run(args: Args) -> Result<bool> {
    let engine = engine_config(&args)?;
    let requests = build_requests(&args)?;

    if requests.is_empty() {
        eprint!("{}\r\n", "[!] No targets specified. Provide a URL, --config or -l <file>.".red());
        let mut cmd = Args::command();
        cmd.print_help().ok();
        return Ok(false);
    }

    if args.dry_run {
        dry_run(&requests, &engine);
        return Ok(true);
    }

    print_banner();

    let total = requests.len();
    let mut reports = Vec::new();
    let mut all_completed = true;

    for (i, request) in requests.into_iter().enumerate() {
        if total > 1 {
            print!(
                "\r\n{}\r\n",
                format!("━━━ Target {}/{}: {} ━━━", i + 1, total, request.url)
                    .bright_white()
                    .bold()
            );
        }
        print_test_config(&request, &engine, &args);

        // One bar per target.
        let sink: SinkRef = if args.no_progress {
            ConsoleSink::new_ref()
        } else {
            Arc::new(ProgressSink::new(args.verbose))
        };
        let service = MutationTestService::new(engine.clone(), sink)?;
        let id = match service.submit(request) {
            Ok(id) => id,
            Err(e) => {
                all_completed = false;
                eprint!("{}\r\n", format!("[!] Skipping target: {}", e).red().bold());
                continue;
            }
        };
        let status = service.wait_for(&id, Duration::from_millis(100)).await?;
        debug!("test {} finished as {}", id, status.current_phase);

        match status.status {
            RunStatus::Completed => {
                let report = service.report(&id)?;
                print_summary(&report);
                reports.push(report);
            }
            _ => {
                all_completed = false;
                eprint!(
                    "{}\r\n",
                    format!(
                        "[!] Test {} failed: {}",
                        id,
                        status.error.as_deref().unwrap_or("unknown error")
                    )
                    .red()
                    .bold()
                );
            }
        }
    }

    if !reports.is_empty() {
        write_reports(&reports, &args.output)?;
        print!(
            "{}\r\n",
            format!("[+] Report written to {}", args.output).green().bold()
        );
    }
    std::io::stdout().flush().ok();

    Ok(all_completed)
}

fn engine_config(args: &Args) -> Result<EngineConfig> {
    let mut engine = match &args.engine_config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load engine config '{}'", path))?,
        None => EngineConfig::default(),
    };
    if let Some(c) = args.concurrency {
        engine.concurrency = c;
    }
    if args.proxy.is_some() {
        engine.proxy = args.proxy.clone();
    }
    if args.insecure {
        engine.accept_invalid_certs = true;
    }
    Ok(engine)
}

/// Builds one request per target. `--config` supplies a full request;
/// `-l` and the positional URL share the flag-provided method, headers and payload.
fn build_requests(args: &Args) -> Result<Vec<TestRequest>> {
    let mut requests = Vec::new();

    if let Some(path) = &args.config {
        let request = TestRequest::from_file(path)
            .with_context(|| format!("failed to load test request '{}'", path))?;
        requests.push(request);
    }

    let payload: Option<serde_json::Value> = match &args.data {
        Some(raw) => Some(serde_json::from_str(raw).context("--data is not valid JSON")?),
        None => None,
    };

    let mut urls = Vec::new();
    if let Some(path) = &args.list {
        let lines = read_lines(path).with_context(|| format!("failed to read '{}'", path))?;
        print!(
            "{}\r\n",
            format!("[+] Loaded {} target(s) from {}", lines.len(), path).green().bold()
        );
        urls.extend(lines);
    }
    if let Some(url) = &args.url {
        urls.push(url.clone());
    }

    for url in urls {
        let mut request = TestRequest::new(url, args.method).with_timeout(args.timeout);
        for (key, val) in parse_custom_headers(&args.headers) {
            request = request.with_header(key, val);
        }
        if let Some(p) = &payload {
            request = request.with_payload(p.clone());
        }
        requests.push(request);
    }

    Ok(requests)
}

/// Prints what each test would send, without touching the network.
fn dry_run(requests: &[TestRequest], engine: &EngineConfig) {
    let catalog = MutationCatalog::new(engine.catalog.clone());
    for request in requests {
        let config = request.clone().into_config();
        if let Err(e) = validate_config(&config, (engine.min_timeout_ms, engine.max_timeout_ms)) {
            println!("[DRY RUN] Invalid test for {}: {}", request.url, e);
            continue;
        }
        let base = HttpRequest::from_config(&config);
        let mutations = catalog.generate(&base);
        println!(
            "[DRY RUN] Would test {} {} with {} mutation(s)",
            request.method,
            request.url,
            mutations.len()
        );
        for m in &mutations {
            println!(
                "  {}  {:<20} {}",
                m.id,
                m.mutation_type.as_str(),
                m.field.as_deref().unwrap_or("(body)")
            );
        }
    }
}

fn write_reports(reports: &[Report], path: &str) -> Result<()> {
    let json = match reports {
        [single] => serde_json::to_string_pretty(single)?,
        many => serde_json::to_string_pretty(many)?,
    };
    write_atomic(path, &json).with_context(|| format!("failed to write report to '{}'", path))?;
    Ok(())
}

fn print_banner() {
    print!("{}\r\n", "mutaprobe".bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

fn print_test_config(request: &TestRequest, engine: &EngineConfig, args: &Args) {
    print!("{}\r\n", format!("[+] Target:      {} {}", request.method, request.url).green().bold());
    print!("{}\r\n", format!("[+] Timeout:     {}ms", request.timeout).blue());
    print!("{}\r\n", format!("[+] Concurrency: {}", engine.concurrency).blue());
    print!("{}\r\n", format!("[+] Output:      {}", args.output).blue());
    if let Some(ref proxy) = engine.proxy {
        print!("{}\r\n", format!("[+] Proxy:       {}", proxy).yellow());
    }
    if !request.headers.is_empty() {
        print!("{}\r\n", format!("[+] Headers:     {} custom", request.headers.len()).yellow());
    }
    if request.payload.is_some() {
        print!("{}\r\n", "[+] Payload:     JSON body".yellow());
    }
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

fn print_summary(report: &Report) {
    let s = &report.summary;
    let f = &report.findings;
    print!("\r\n{}\r\n", "[*] Summary".bright_cyan().bold());
    print!("    Tests:           {} ({} ok, {} failed)\r\n", s.total_tests, s.successful_tests, s.failed_tests);
    print!("    Avg response:    {:.1}ms\r\n", s.average_response_time);
    print!("    Duration:        {}ms\r\n", report.metadata.total_duration);

    let vulns = format!(
        "{} (critical {}, high {}, medium {}, low {})",
        s.vulnerabilities_found, f.critical, f.high, f.medium, f.low
    );
    let issues = format!(
        "{} (crash {}, timeout {}, unexpected success {}, anomaly {})",
        s.integrity_issues, f.service_crash, f.timeout_issue, f.unexpected_success, f.response_anomaly
    );
    if s.vulnerabilities_found > 0 {
        print!("    Vulnerabilities: {}\r\n", vulns.red().bold());
    } else {
        print!("    Vulnerabilities: {}\r\n", vulns.green());
    }
    if s.integrity_issues > 0 {
        print!("    Integrity:       {}\r\n", issues.yellow().bold());
    } else {
        print!("    Integrity:       {}\r\n", issues.green());
    }
    std::io::stdout().flush().ok();
}

/// Renders a run as a progress bar, printing flagged results above it.
struct ProgressSink {
    bar: ProgressBar,
    verbose: bool,
}

impl ProgressSink {
    fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar, verbose }
    }
}

impl RunEventSink for ProgressSink {
    fn on_log(&self, level: &str, message: &str) {
        let line = match level {
            "success" => message.green().to_string(),
            "error" => message.red().to_string(),
            "warn" => message.yellow().to_string(),
            _ if self.verbose => message.to_string(),
            _ => return,
        };
        self.bar.println(line);
    }

    fn on_result(&self, _test_id: &str, result: &TestResult) {
        if !result.vulnerability_detected && !result.integrity_issue && !self.verbose {
            return;
        }
        let kind = result
            .mutation_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "happy path".to_string());
        let label = match (result.severity, result.integrity_category) {
            (Some(sev), _) => format!("{} vulnerability", sev).red().bold().to_string(),
            (None, Some(cat)) => cat.to_string().yellow().bold().to_string(),
            (None, None) => "ok".dimmed().to_string(),
        };
        self.bar.println(format!(
            "{} {} {} -> {} ({}ms)",
            "[+]".green().bold(),
            label,
            kind.bright_yellow(),
            result.status_code,
            result.response_time
        ));
    }

    fn on_progress(&self, status: &TestStatus) {
        self.bar.set_length(status.total_mutations as u64);
        self.bar.set_position(status.completed_mutations as u64);
        self.bar.set_message(status.current_phase.to_string());
        if status.is_terminal() {
            self.bar.finish_and_clear();
        }
    }
}
