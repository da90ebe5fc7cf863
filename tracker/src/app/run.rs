//! Deploy-and-follow run loop

use std::future::Future;
use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::channels::{PollSource, PushSource};
use crate::errors::TrackerError;
use crate::http::client::HttpClient;
use crate::models::deployment::DeployRequest;
use crate::track::classify::Severity;
use crate::track::controller::{TeardownReason, Tracker, TrackerView};
use crate::track::fsm::{LifecycleState, LogRecord};

/// Initiate a deployment and follow it until it finishes or `shutdown_signal` fires.
///
/// Returns the last observed lifecycle state.
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<LifecycleState, TrackerError> {
    let client = Arc::new(HttpClient::new(
        &options.backend_base_url,
        options.token,
        options.request_timeout,
    )?);

    println!("{}", "🚀 Initiating deployment...".normal());
    let request = DeployRequest {
        git_url: options.repo_url.clone(),
        project_id: options.job_id.clone(),
    };
    let ack = match client.initiate_deploy(&request).await {
        Ok(ack) => ack,
        Err(e) => {
            error!("Initiate-deploy failed: {}", e);
            println!("{}", format!("❌ {}", e).red());
            return Err(e);
        }
    };
    println!("{}", format!("✓ {}", ack.message).green());

    let push_source: Option<Arc<dyn PushSource>> = if options.enable_push {
        Some(client.clone())
    } else {
        None
    };
    let poll_source: Option<Arc<dyn PollSource>> = if options.enable_poll {
        Some(client.clone())
    } else {
        None
    };

    let tracker = Tracker::new(options.tracker, push_source, poll_source)?;
    let session = tracker.start(&options.job_id)?;
    println!("{}", "📡 Connecting to build stream...".normal());

    let mut view_rx = session.subscribe();
    let mut shutdown_signal = Box::pin(shutdown_signal);
    let mut last_sequence = 0;

    let final_view = loop {
        let view = view_rx.borrow_and_update().clone();
        last_sequence = render_new(&view, last_sequence);
        if view.teardown.is_some() {
            break view;
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Shutdown requested, cancelling tracking of {}", options.job_id);
                tracker.cancel();
                break tracker.view();
            }
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break tracker.view();
                }
            }
        }
    };

    print_summary(&final_view);
    Ok(final_view.state)
}

/// Print records newer than `after`; returns the last printed sequence
fn render_new(view: &TrackerView, after: u64) -> u64 {
    let mut last = after;
    // Sequences start at 1 with no gaps
    for record in view.log.iter_from(after as usize) {
        println!("{}", format_record(record));
        last = record.sequence;
    }
    last
}

/// One log record as a colored terminal line
pub fn format_record(record: &LogRecord) -> String {
    let time = record
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S")
        .to_string();
    let line = format!("{} {}", time.dimmed(), record.message);
    match record.severity {
        Severity::Success => line.green().to_string(),
        Severity::Error => line.red().to_string(),
        Severity::Info => line,
    }
}

fn print_summary(view: &TrackerView) {
    match (view.state, view.teardown) {
        (LifecycleState::Succeeded, _) => {
            if let Some(url) = &view.snapshot.result_url {
                println!("{}", format!("🌐 Your app is live at: {}", url).green().bold());
            }
        }
        (LifecycleState::Failed, _) => {
            println!("{}", "Deployment did not go live.".red().bold());
        }
        (_, Some(TeardownReason::Cancelled)) => {
            println!("Stopped following the deployment; it keeps running on the server.");
        }
        _ => {}
    }
}
