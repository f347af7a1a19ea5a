use std::time::Duration;

use hearth_lib::bus::event_types::{EVENT_NAVIGATION, EVENT_UPLOAD_REQUESTED, EVENT_WIDGET_ERROR};
use hearth_lib::config::DashboardConfig;
use hearth_lib::core::UserRef;
use hearth_lib::messenger::{ChannelTransport, FrameEndpoint, OutboundMessage};
use hearth_lib::{
    connect_backend, init_tracing, token_provider_from_config, AppError, DashboardHost,
};
use serde_json::json;

struct SimOptions {
    duration: Duration,
    user: String,
    theme: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("hearth simulator failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let Some(options) = parse_args()? else {
        return Ok(());
    };
    init_tracing();

    let config = DashboardConfig::load()?;
    let tokens = token_provider_from_config(&config);
    let backend = connect_backend(&config, tokens).await?;

    let transport = ChannelTransport::new();
    let expected = config.expected_widgets.clone();
    let host = DashboardHost::new(config, backend, transport.clone());
    host.start();

    for event in [EVENT_UPLOAD_REQUESTED, EVENT_NAVIGATION, EVENT_WIDGET_ERROR] {
        host.bus().on(event, |event| {
            tracing::info!(event = ?event, "shell received widget request");
        });
    }

    let mut widgets = Vec::new();
    for (index, name) in expected.iter().enumerate() {
        let endpoint = transport.attach(format!("frame-{index}"), Some(name.as_str()));
        widgets.push(tokio::spawn(run_widget(name.clone(), endpoint)));
    }
    host.messenger().set_focus(expected.first().map(String::as_str));

    host.sign_in(UserRef {
        id: options.user.clone(),
        email: None,
        display_name: Some(options.user.clone()),
    });
    if let Some(outcome) = host.release().await {
        tracing::info!(
            registered = ?outcome.registered,
            timed_out = ?outcome.timed_out,
            "widget wait finished"
        );
    }
    if let Some(theme) = options.theme {
        host.set_theme(theme);
    }

    tokio::time::sleep(options.duration).await;

    host.sign_out();
    tokio::time::sleep(Duration::from_millis(200)).await;
    host.shutdown();
    for widget in widgets {
        widget.abort();
    }
    Ok(())
}

/// A scripted widget: handshake, ask for a refresh, then log whatever the
/// host sends.
async fn run_widget(name: String, mut endpoint: FrameEndpoint) {
    endpoint.mark_loaded();
    endpoint.post(json!({ "type": "widget-ready", "widget": name }));
    if name == "photos" {
        endpoint.post(json!({ "type": "request-refresh", "widget": name, "dataType": "photos" }));
    }
    if name == "calendar" {
        endpoint.post(json!({ "action": "down" }));
    }

    while let Some(raw) = endpoint.recv().await {
        match serde_json::from_value::<OutboundMessage>(raw) {
            Ok(OutboundMessage::WidgetUpdate { payload, .. }) => tracing::info!(
                widget = %name,
                signed_in = payload.auth.ready,
                events = payload.calendar.as_ref().map(|c| c.events.len()),
                photos = payload.photos.as_ref().map(|p| p.count),
                theme = %payload.theme,
                "state update"
            ),
            Ok(OutboundMessage::WidgetCommand { action }) => {
                tracing::info!(widget = %name, action = ?action, "navigation command")
            }
            Err(error) => tracing::warn!(widget = %name, %error, "unreadable host message"),
        }
    }
}

fn parse_args() -> Result<Option<SimOptions>, AppError> {
    let mut options = SimOptions {
        duration: Duration::from_secs(5),
        user: "family".to_string(),
        theme: None,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| AppError::Other(format!("{flag} requires a value")))
        };
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            "--duration-secs" => {
                let raw = value("--duration-secs")?;
                let secs = raw.parse::<u64>().map_err(|_| {
                    AppError::Other(format!("invalid --duration-secs value '{raw}'"))
                })?;
                options.duration = Duration::from_secs(secs);
            }
            "--user" => options.user = value("--user")?,
            "--theme" => options.theme = Some(value("--theme")?),
            other => return Err(AppError::Other(format!("unknown argument '{other}'"))),
        }
    }
    Ok(Some(options))
}

fn print_help() {
    println!(
        "hearth-sim: run the dashboard host against scripted in-process widgets\n\n\
         USAGE: hearth-sim [--duration-secs N] [--user ID] [--theme NAME]\n\n\
         Configuration comes from HEARTH_CONFIG and HEARTH_* variables. Without\n\
         HEARTH_BACKEND_URL an in-memory demo backend is used."
    );
}
