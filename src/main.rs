//! meshcast - MeshCore situational-awareness broadcaster
//!
//! One invocation is one run; schedule it from cron or a systemd timer.
//!
//! # Usage
//!
//! ```bash
//! # Preview nearby quakes without touching the radio
//! meshcast quakes --dry-run
//!
//! # VHF activators within 50 miles, on the "hams" channel
//! meshcast spots --band vhf --vhf-max-radius 50 --channel hams
//!
//! # SKYWARN alerts around a zip code, with an all-clear when quiet
//! meshcast alerts --zip 95125 --skywarn-only --send-clear
//!
//! # Propagation report including VHF and tropo
//! meshcast solar --vhf
//!
//! # Weather for one personal weather station
//! meshcast weather --stations KCASANJO823
//!
//! # Event reminders (run every 15 minutes)
//! meshcast calendar
//!
//! # What does the radio have configured?
//! meshcast list-channels
//! ```
//!
//! # Environment Variables
//!
//! - `MESHCAST_CONFIG`: Path to meshcast.toml (default: ./meshcast.toml)
//! - `MESHCAST_WU_API_KEY`: Weather Underground key (overrides the config)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use meshcast::config::{defaults, validation, StationConfig, WeatherSelection};
use meshcast::encoder::templates::{
    AlertTemplate, QuakeTemplate, SolarTemplate, SpotTemplate, WeatherTemplate,
};
use meshcast::encoder::MessageEncoder;
use meshcast::feeds::calendar::upcoming;
use meshcast::feeds::geocode;
use meshcast::feeds::{
    AlertFilter, CalendarSource, FeedClient, HttpGeocoder, LocationRequest, NwsQuery, NwsSource,
    PotaSource, SolarMode, SolarSource, SotaSource, TropoQuery, UsgsSource, WeatherSource,
};
use meshcast::geo::GeoPoint;
use meshcast::pipeline::{
    CalendarRunConfig, GeoFilterSpec, Orchestrator, RadiusBand, RecordSource, RunConfig,
    RunReport, SortOrder,
};
use meshcast::storage::{NotificationStateStore, NotificationWindow};
use meshcast::transport::{ChannelDirectory, LinkConnector, SessionOptions};
use meshcast::types::{BandSelection, Category, Severity};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "meshcast")]
#[command(about = "Broadcast quakes, spots, alerts, propagation, weather and events over MeshCore")]
#[command(version)]
struct CliArgs {
    /// Path to meshcast.toml (overrides MESHCAST_CONFIG and ./meshcast.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: SubCommand,
}

/// Flags shared by every broadcasting subcommand.
#[derive(clap::Args, Debug, Clone)]
struct RunArgs {
    /// Render and log messages without connecting to the radio
    #[arg(long)]
    dry_run: bool,

    /// Channel key to broadcast on (default: the feed's configured channel)
    #[arg(long)]
    channel: Option<String>,

    /// Maximum number of messages
    #[arg(long)]
    limit: Option<usize>,

    /// Seconds to wait between messages
    #[arg(long)]
    delay: Option<f64>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Recent earthquakes around the station
    Quakes {
        #[command(flatten)]
        run: RunArgs,
        /// Maximum distance from the station
        #[arg(long)]
        radius: Option<f64>,
        #[arg(long)]
        min_magnitude: Option<f64>,
        /// Look back this many hours
        #[arg(long)]
        hours: Option<u32>,
    },

    /// Parks on the Air and Summits on the Air activators
    Spots {
        #[command(flatten)]
        run: RunArgs,
        /// all, hf or vhf
        #[arg(long)]
        band: Option<BandSelection>,
        #[arg(long)]
        hf_min_radius: Option<f64>,
        #[arg(long)]
        hf_max_radius: Option<f64>,
        #[arg(long)]
        vhf_min_radius: Option<f64>,
        #[arg(long)]
        vhf_max_radius: Option<f64>,
        #[arg(long, conflicts_with = "pota_only")]
        sota_only: bool,
        #[arg(long)]
        pota_only: bool,
        /// SOTA look-back window in hours
        #[arg(long)]
        hours: Option<u32>,
    },

    /// Active National Weather Service alerts
    Alerts(AlertArgs),

    /// HF band conditions and solar indices, optionally VHF and tropo
    Solar {
        #[command(flatten)]
        run: RunArgs,
        /// Add sporadic-E, aurora, meteor and tropo messages
        #[arg(long, conflicts_with = "hfband")]
        vhf: bool,
        /// Only the per-band HF conditions message
        #[arg(long)]
        hfband: bool,
    },

    /// Weather Underground station and city reports
    Weather {
        #[command(flatten)]
        run: RunArgs,
        /// Only these station ids
        #[arg(long, num_args = 1.., value_name = "ID")]
        stations: Vec<String>,
        /// Only these city names
        #[arg(long, num_args = 1.., value_name = "NAME")]
        cities: Vec<String>,
        #[arg(long, conflicts_with = "cities_only")]
        pws_only: bool,
        #[arg(long)]
        cities_only: bool,
    },

    /// Reminders for scheduled events
    Calendar {
        #[arg(long)]
        dry_run: bool,
        /// Send every reminder here instead of the event's own channels
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        delay: Option<f64>,
        /// List events in the next DAYS days and exit
        #[arg(long, value_name = "DAYS")]
        preview: Option<i64>,
    },

    /// Send one text message
    Send {
        #[arg(long, default_value = defaults::PUBLIC_CHANNEL_KEY)]
        channel: String,
        #[arg(long)]
        dry_run: bool,
        /// Message text
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Show the radio's channel slots and which configured key each matches
    ListChannels,

    /// Forget every sent event reminder
    ResetState,
}

#[derive(clap::Args, Debug)]
struct AlertArgs {
    #[command(flatten)]
    run: RunArgs,
    /// minor, moderate, severe or extreme
    #[arg(long)]
    min_severity: Option<String>,
    /// Event-name keyword; repeat for several
    #[arg(long = "type", value_name = "KEYWORD")]
    event_types: Vec<String>,
    /// Only events SKYWARN spotters are activated for
    #[arg(long)]
    skywarn_only: bool,
    /// Maximum distance of alerts from the center
    #[arg(long)]
    radius: Option<f64>,
    /// Center on a US zip code
    #[arg(long, conflicts_with_all = ["lat", "state"])]
    zip: Option<String>,
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,
    /// NWS area code; alone it covers the whole state
    #[arg(long)]
    state: Option<String>,
    /// Broadcast "No active alerts" when nothing is found
    #[arg(long)]
    send_clear: bool,
}

// ============================================================================
// Setup
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<StationConfig> {
    let config = match path {
        Some(p) => StationConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config {}", p.display()))?,
        None => StationConfig::load().context("Failed to load config")?,
    };
    for w in validation::validate_plausibility(&config) {
        warn!(field = %w.field, "{}", w);
    }
    Ok(config)
}

fn build_orchestrator(config: &StationConfig) -> Result<Orchestrator> {
    let directory =
        ChannelDirectory::new(&config.channels).context("Invalid [[channels]] configuration")?;
    let connector =
        LinkConnector::from_config(&config.transport).context("Invalid [transport] configuration")?;
    let options = SessionOptions::from_config(&config.transport, &config.retry);
    Ok(Orchestrator::new(
        Box::new(connector),
        options,
        directory,
        MessageEncoder::default(),
    ))
}

fn feed_client(user_agent: &str) -> Result<FeedClient> {
    FeedClient::new(user_agent, Duration::from_secs(defaults::HTTP_TIMEOUT_SECS))
        .context("Failed to build HTTP client")
}

fn pacing(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or_default()
}

fn band(
    min: Option<f64>,
    max: Option<f64>,
    configured: RadiusBand,
    flag: &str,
) -> Result<RadiusBand> {
    let band = RadiusBand::new(min.unwrap_or(configured.min), max.unwrap_or(configured.max));
    if let Some(problem) = band.problem() {
        bail!("--{flag}: {problem}");
    }
    Ok(band)
}

fn log_report(feed: &str, report: &RunReport) {
    info!(
        feed,
        fetched = report.fetched,
        deduped = report.deduped,
        filtered = report.filtered,
        encoded = report.encoded,
        sent = report.sent,
        failed = report.failed,
        skipped = report.skipped,
        "Run complete"
    );
    if !report.failed_sources.is_empty() {
        warn!(feed, sources = ?report.failed_sources, "Some sources failed this run");
    }
}

// ============================================================================
// Subcommands
// ============================================================================

async fn run_quakes(
    config: &StationConfig,
    run: RunArgs,
    radius: Option<f64>,
    min_magnitude: Option<f64>,
    hours: Option<u32>,
) -> Result<()> {
    let q = &config.feeds.quakes;
    let station = &config.station;
    let ring = band(None, radius, q.radius, "radius")?;

    let sources: Vec<Box<dyn RecordSource>> = vec![Box::new(UsgsSource {
        client: feed_client(defaults::APP_NAME)?,
        url: q.url.clone(),
        center: station.center(),
        search_radius_km: q.search_radius_km,
        min_magnitude: min_magnitude.unwrap_or(q.min_magnitude),
        lookback_hours: hours.unwrap_or(q.lookback_hours),
        limit: run.limit.unwrap_or(q.limit),
    })];
    let template = QuakeTemplate {
        zone: station.display_zone(),
        center_label: station.label.clone(),
        unit: station.unit,
        strip_place_suffixes: q.strip_place_suffixes.clone(),
    };
    let run_config = RunConfig {
        dry_run: run.dry_run,
        channel_key: run.channel.unwrap_or_else(|| q.channel.clone()),
        limit: run.limit.unwrap_or(q.limit),
        inter_message_delay: pacing(run.delay.unwrap_or(q.delay_secs)),
        center: station.center(),
        filter: GeoFilterSpec::default().with_band(Category::Quake, ring),
        unit: station.unit,
        sort: SortOrder::Strongest,
        all_clear: None,
    };

    let report = build_orchestrator(config)?
        .run(&sources, &template, &run_config)
        .await
        .context("Quake run failed")?;
    log_report("quakes", &report);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_spots(
    config: &StationConfig,
    run: RunArgs,
    selection: Option<BandSelection>,
    hf: (Option<f64>, Option<f64>),
    vhf: (Option<f64>, Option<f64>),
    sota_only: bool,
    pota_only: bool,
    hours: Option<u32>,
) -> Result<()> {
    let s = &config.feeds.spots;
    let station = &config.station;
    let hf_band = band(hf.0, hf.1, s.hf, "hf-max-radius")?;
    let vhf_band = band(vhf.0, vhf.1, s.vhf, "vhf-max-radius")?;
    let selection = selection.unwrap_or(s.band);
    let client = feed_client(defaults::APP_NAME)?;

    let mut sources: Vec<Box<dyn RecordSource>> = Vec::new();
    if !sota_only {
        sources.push(Box::new(PotaSource {
            client: client.clone(),
            url: s.pota_url.clone(),
            band: selection,
        }));
    }
    if !pota_only {
        sources.push(Box::new(SotaSource::new(
            client,
            &s.sota_spots_url,
            &s.sota_summit_url,
            hours.unwrap_or(s.sota_lookback_hours),
            s.sota_associations.clone(),
            selection,
        )));
    }

    let template = SpotTemplate {
        zone: station.display_zone(),
        center_label: station.label.clone(),
        unit: station.unit,
    };
    let run_config = RunConfig {
        dry_run: run.dry_run,
        channel_key: run.channel.unwrap_or_else(|| s.channel.clone()),
        limit: run.limit.unwrap_or(s.limit),
        inter_message_delay: pacing(run.delay.unwrap_or(s.delay_secs)),
        center: station.center(),
        filter: GeoFilterSpec::default()
            .with_band(Category::Hf, hf_band)
            .with_band(Category::Vhf, vhf_band),
        unit: station.unit,
        sort: SortOrder::Nearest,
        all_clear: None,
    };

    let report = build_orchestrator(config)?
        .run(&sources, &template, &run_config)
        .await
        .context("Spot run failed")?;
    log_report("spots", &report);
    Ok(())
}

async fn run_alerts(config: &StationConfig, args: AlertArgs) -> Result<()> {
    let a = &config.feeds.alerts;
    let station = &config.station;
    let run = args.run;

    let point = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon).context("--lat/--lon")?),
        _ => None,
    };
    let mut request = LocationRequest::from_options(args.zip, point, args.state);
    if let (LocationRequest::Station, Some(zip)) = (&request, &a.zip) {
        request = LocationRequest::Zip(zip.clone());
    }
    let client = feed_client(&a.user_agent)?;
    let geocoder = HttpGeocoder {
        client: client.clone(),
        zip_url: a.zip_url.clone(),
        points_url: a.points_url.clone(),
        user_agent: a.user_agent.clone(),
    };
    let location = geocode::resolve(&request, &station.alert_location(), &geocoder).await?;
    let ring = band(None, args.radius.or(request.default_radius()), a.radius, "radius")?;

    let min_severity = match args.min_severity {
        Some(raw) => match Severity::from_cap(&raw) {
            Severity::Unknown => bail!("--min-severity: unknown severity '{raw}'"),
            s => Some(s),
        },
        None => a.min_severity,
    };
    let filter = AlertFilter {
        min_severity,
        event_types: if args.event_types.is_empty() {
            a.event_types.clone()
        } else {
            args.event_types
        },
        skywarn_only: args.skywarn_only || a.skywarn_only,
    };

    let mut queries = vec![NwsQuery::Point(location.center)];
    if !location.state.is_empty() {
        queries.push(NwsQuery::Area(location.state.clone()));
    }
    let sources: Vec<Box<dyn RecordSource>> = queries
        .into_iter()
        .map(|query| -> Box<dyn RecordSource> {
            Box::new(NwsSource {
                client: client.clone(),
                url: a.url.clone(),
                user_agent: a.user_agent.clone(),
                query,
                filter: filter.clone(),
            })
        })
        .collect();

    let template = AlertTemplate {
        zone: station.display_zone(),
        unit: station.unit,
    };
    let all_clear = (args.send_clear || a.send_clear)
        .then(|| template.all_clear(&location.place, ring.max));
    let run_config = RunConfig {
        dry_run: run.dry_run,
        channel_key: run.channel.unwrap_or_else(|| a.channel.clone()),
        limit: run.limit.unwrap_or(a.limit),
        inter_message_delay: pacing(run.delay.unwrap_or(a.delay_secs)),
        center: location.center,
        filter: GeoFilterSpec::default().with_band(Category::Alert, ring),
        unit: station.unit,
        sort: SortOrder::MostSevere,
        all_clear,
    };

    let report = build_orchestrator(config)?
        .run(&sources, &template, &run_config)
        .await
        .context("Alert run failed")?;
    log_report("alerts", &report);
    Ok(())
}

async fn run_solar(config: &StationConfig, run: RunArgs, vhf: bool, hfband: bool) -> Result<()> {
    let s = &config.feeds.solar;
    let station = &config.station;
    let mode = if hfband {
        SolarMode::HfBandsOnly
    } else if vhf || s.vhf {
        SolarMode::WithVhf
    } else {
        SolarMode::Standard
    };

    let sources: Vec<Box<dyn RecordSource>> = vec![Box::new(SolarSource {
        client: feed_client(defaults::APP_NAME)?,
        url: s.url.clone(),
        mode,
        tropo: TropoQuery {
            url: s.tropo_url.clone(),
            center: station.center(),
            site: station.label.clone(),
            tz: station.display_zone().tz(),
        },
    })];
    let run_config = RunConfig {
        dry_run: run.dry_run,
        channel_key: run.channel.unwrap_or_else(|| s.channel.clone()),
        limit: run.limit.unwrap_or(s.limit),
        inter_message_delay: pacing(run.delay.unwrap_or(s.delay_secs)),
        center: station.center(),
        filter: GeoFilterSpec::default(),
        unit: station.unit,
        sort: SortOrder::Unsorted,
        all_clear: None,
    };

    let report = build_orchestrator(config)?
        .run(&sources, &SolarTemplate, &run_config)
        .await
        .context("Solar run failed")?;
    log_report("solar", &report);
    Ok(())
}

async fn run_weather(
    config: &StationConfig,
    run: RunArgs,
    selection: WeatherSelection,
) -> Result<()> {
    let w = &config.feeds.weather;
    let station = &config.station;
    let api_key = std::env::var("MESHCAST_WU_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| w.api_key.clone());
    if api_key.trim().is_empty() {
        bail!("no Weather Underground API key: set feeds.weather.api_key or MESHCAST_WU_API_KEY");
    }
    let locations = w.locations(&selection);
    if locations.is_empty() {
        bail!("no weather stations or cities match; check [feeds.weather] and the filters");
    }

    let sources: Vec<Box<dyn RecordSource>> = vec![Box::new(WeatherSource {
        client: feed_client(defaults::APP_NAME)?,
        api_key,
        observation_url: w.observation_url.clone(),
        forecast_url: w.forecast_url.clone(),
        locations,
    })];
    let run_config = RunConfig {
        dry_run: run.dry_run,
        channel_key: run.channel.unwrap_or_else(|| w.channel.clone()),
        limit: run.limit.unwrap_or(w.limit),
        inter_message_delay: pacing(run.delay.unwrap_or(w.delay_secs)),
        center: station.center(),
        filter: GeoFilterSpec::default(),
        unit: station.unit,
        sort: SortOrder::Unsorted,
        all_clear: None,
    };

    let report = build_orchestrator(config)?
        .run(&sources, &WeatherTemplate, &run_config)
        .await
        .context("Weather run failed")?;
    log_report("weather", &report);
    Ok(())
}

async fn run_calendar(
    config: &StationConfig,
    dry_run: bool,
    channel: Option<String>,
    delay: Option<f64>,
    preview: Option<i64>,
) -> Result<()> {
    let c = &config.feeds.calendar;
    let zone = config.station.display_zone();
    let source = CalendarSource {
        client: feed_client(defaults::APP_NAME)?,
        csv_url: c.csv_url.clone(),
        tz: zone.tz(),
    };
    let now = Utc::now();

    if let Some(days) = preview {
        let records = source.fetch().await.context("Failed to fetch calendar")?;
        let soon = upcoming(&records, now, days);
        println!("{} event(s) in the next {days} day(s):", soon.len());
        for r in soon {
            println!(
                "  {}  {}  [{}]",
                zone.local(r.timestamp).format("%a %b %d %H:%M"),
                r.field("name"),
                r.field("channels")
            );
        }
        return Ok(());
    }

    let backend = config
        .state
        .open_backend()
        .context("Failed to open notification state")?;
    let mut store = NotificationStateStore::load(backend, now, config.state.retention())
        .context("Failed to load notification state")?;

    let run_config = CalendarRunConfig {
        dry_run,
        channel_override: channel,
        default_channel: c.default_channel.clone(),
        windows: c
            .windows_hours
            .iter()
            .map(|h| NotificationWindow::hours(*h))
            .collect(),
        fire_tolerance: config.state.fire_tolerance(),
        inter_message_delay: pacing(delay.unwrap_or(c.delay_secs)),
        zone,
    };
    let sources: Vec<Box<dyn RecordSource>> = vec![Box::new(source)];

    let report = build_orchestrator(config)?
        .run_calendar(&sources, &mut store, &run_config, now)
        .await
        .context("Calendar run failed")?;
    log_report("calendar", &report);
    Ok(())
}

async fn send(
    config: &StationConfig,
    channel: &str,
    text: &[String],
    dry_run: bool,
) -> Result<()> {
    let report = build_orchestrator(config)?
        .send_text(channel, &text.join(" "), dry_run)
        .await
        .with_context(|| format!("Failed to send to '{channel}'"))?;
    if report.failed > 0 {
        bail!("message to '{channel}' was not delivered");
    }
    log_report("send", &report);
    Ok(())
}

async fn list_channels(config: &StationConfig) -> Result<()> {
    let slots = build_orchestrator(config)?
        .list_channels()
        .await
        .context("Failed to read channels from the radio")?;
    println!("{:>4}  {:<24} configured key", "slot", "name");
    for (slot, key) in slots {
        println!("{:>4}  {:<24} {}", slot.index, slot.name, key.as_deref().unwrap_or("-"));
    }
    Ok(())
}

fn reset_state(config: &StationConfig) -> Result<()> {
    let backend = config
        .state
        .open_backend()
        .context("Failed to open notification state")?;
    let mut store = NotificationStateStore::load(backend, Utc::now(), config.state.retention())
        .context("Failed to load notification state")?;
    let cleared = store.len();
    store.reset().context("Failed to clear notification state")?;
    info!(cleared, path = %config.state.path.display(), "Notification state reset");
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let config = load_config(args.config.as_deref())?;
    info!(
        station = %config.station.label,
        lat = config.station.latitude,
        lon = config.station.longitude,
        channels = config.channels.len(),
        "meshcast starting"
    );

    match args.command {
        SubCommand::Quakes {
            run,
            radius,
            min_magnitude,
            hours,
        } => run_quakes(&config, run, radius, min_magnitude, hours).await,
        SubCommand::Spots {
            run,
            band,
            hf_min_radius,
            hf_max_radius,
            vhf_min_radius,
            vhf_max_radius,
            sota_only,
            pota_only,
            hours,
        } => {
            run_spots(
                &config,
                run,
                band,
                (hf_min_radius, hf_max_radius),
                (vhf_min_radius, vhf_max_radius),
                sota_only,
                pota_only,
                hours,
            )
            .await
        }
        SubCommand::Alerts(args) => run_alerts(&config, args).await,
        SubCommand::Solar { run, vhf, hfband } => run_solar(&config, run, vhf, hfband).await,
        SubCommand::Weather {
            run,
            stations,
            cities,
            pws_only,
            cities_only,
        } => {
            let selection = WeatherSelection {
                station_ids: stations,
                city_names: cities,
                stations: !cities_only,
                cities: !pws_only,
            };
            run_weather(&config, run, selection).await
        }
        SubCommand::Calendar {
            dry_run,
            channel,
            delay,
            preview,
        } => run_calendar(&config, dry_run, channel, delay, preview).await,
        SubCommand::Send {
            channel,
            dry_run,
            text,
        } => send(&config, &channel, &text, dry_run).await,
        SubCommand::ListChannels => list_channels(&config).await,
        SubCommand::ResetState => reset_state(&config),
    }
}
