//! Pixel Press - an image compression service.
//!
//! This binary starts the HTTP server and configures all components.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use image::{DynamicImage, Rgba, RgbaImage};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixel_press::{
    codec::{EncodeSettings, ImageCodec, StandardCodec},
    config::{CheckConfig, Cli, Command, ServeConfig, SignConfig, SignOutputFormat},
    policy::{EncodeFormat, QualityCurve},
    server::{auth::TokenAuth, create_router, RouterConfig},
    service::CompressionService,
    usage::{InMemoryUsageStore, Plan, PlanCatalog},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Sign(config) => run_sign(config),
        Command::Check(config) => run_check(config),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let curve = match config.quality_curve() {
        Ok(curve) => curve,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let catalog = config.plan_catalog();
    let codec = StandardCodec::new();

    print_banner();

    info!("Configuration:");
    if config.auth_enabled {
        info!("  Auth: enabled");
    } else {
        warn!("  Auth: DISABLED - callers are identified by the X-User-Id header");
        warn!("        Enable for production: --auth-enabled=true --auth-secret=<secret>");
    }
    if config.trust_forwarded_for {
        info!("  Client address: first X-Forwarded-For hop");
    }
    match config.rate_limit() {
        Some(limit) => info!(
            "  Rate limit: {} requests per {}s",
            limit.max_requests,
            limit.window.as_secs()
        ),
        None => warn!("  Rate limit: DISABLED"),
    }
    info!("  Default plan: {}", config.default_plan);
    log_plans(&catalog);
    if !config.plan_overrides.is_empty() {
        info!("  Plan overrides: {}", config.plan_overrides.len());
    }
    info!(
        "  Quality curve: {} (encoder {}-{}, near-lossless from {})",
        config.quality_anchors,
        curve.floor(),
        curve.ceiling(),
        curve.near_lossless_threshold()
    );
    if codec.supports(EncodeFormat::Avif) {
        info!("  AVIF: available");
    } else {
        warn!("  AVIF: not compiled in, AVIF candidates are skipped");
    }

    let store = InMemoryUsageStore::with_capacity(catalog, config.default_plan, config.usage_entries)
        .with_overrides(config.plan_overrides.clone());
    let service = CompressionService::with_codec(store, Arc::new(codec), curve);

    let router = create_router(service, build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    if config.auth_enabled {
        info!("    pixel-press sign --identity <id>   # mint a bearer token");
        info!(
            "    curl -H 'Authorization: Bearer <token>' -F file=@photo.jpg http://{}/api/compress -o out",
            addr
        );
    } else {
        info!(
            "    curl -H 'X-User-Id: dev' -F file=@photo.jpg -F quality=80 http://{}/api/compress -o out",
            addr
        );
    }
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    let app = router.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("██████╗ ██╗██╗  ██╗███████╗██╗         ██████╗ ██████╗ ███████╗███████╗███████╗");
    info!("██╔══██╗██║╚██╗██╔╝██╔════╝██║         ██╔══██╗██╔══██╗██╔════╝██╔════╝██╔════╝");
    info!("██████╔╝██║ ╚███╔╝ █████╗  ██║         ██████╔╝██████╔╝█████╗  ███████╗███████╗");
    info!("██╔═══╝ ██║ ██╔██╗ ██╔══╝  ██║         ██╔═══╝ ██╔══██╗██╔══╝  ╚════██║╚════██║");
    info!("██║     ██║██╔╝ ██╗███████╗███████╗    ██║     ██║  ██║███████╗███████║███████║");
    info!("╚═╝     ╚═╝╚═╝  ╚═╝╚══════╝╚══════╝    ╚═╝     ╚═╝  ╚═╝╚══════╝╚══════╝╚══════╝");
    info!("");
    info!("                                    v{}", version);
}

fn log_plans(catalog: &PlanCatalog) {
    for plan in [Plan::Free, Plan::Pro, Plan::Business] {
        let limits = catalog.limits(plan);
        info!(
            "  Plan {:<8} {} images/month, {:.1} MiB max upload",
            plan.as_str(),
            limits.monthly_images,
            limits.max_file_size as f64 / (1024.0 * 1024.0)
        );
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pixel_press=debug,tower_http=debug"
    } else {
        "pixel_press=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = if config.auth_enabled {
        RouterConfig::new(config.auth_secret_or_empty())
    } else {
        RouterConfig::without_auth()
    };

    router_config = router_config.with_max_body_size(config.max_body_size);

    router_config = match config.rate_limit() {
        Some(limit) => router_config.with_rate_limit(limit.max_requests, limit.window),
        None => router_config.without_rate_limit(),
    };

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
        .with_trust_forwarded_for(config.trust_forwarded_for)
        .with_tracing(!config.no_tracing)
}

// =============================================================================
// Sign Command
// =============================================================================

fn run_sign(config: SignConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let auth = TokenAuth::new(&config.secret);
    let (token, expiry) = auth.sign(&config.identity, Duration::from_secs(config.ttl));

    match config.format {
        SignOutputFormat::Token => {
            println!("{}", token);
        }
        SignOutputFormat::Json => {
            let json = serde_json::json!({
                "token": token,
                "identity": config.identity,
                "expiry": expiry,
                "ttl": config.ttl,
            });
            match serde_json::to_string_pretty(&json) {
                Ok(out) => println!("{}", out),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

fn run_check(config: CheckConfig) -> ExitCode {
    let config = config.serve;
    if config.verbose {
        init_logging(true);
    }

    println!("Pixel Press Configuration Check");
    println!("═══════════════════════════════");
    println!();

    if let Err(e) = config.validate() {
        println!("✗ Configuration: {}", e);
        return ExitCode::FAILURE;
    }
    println!("✓ Configuration valid");
    println!(
        "✓ Auth: {}",
        if config.auth_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("✓ Default plan: {}", config.default_plan);

    let curve = match config.quality_curve() {
        Ok(curve) => curve,
        Err(e) => {
            println!("✗ Quality curve: {}", e);
            return ExitCode::FAILURE;
        }
    };
    print_curve(&curve);
    println!();

    println!("Encoders:");
    println!("─────────");
    let codec = StandardCodec::new();
    let sample = sample_image();
    let mut failed = false;

    for settings in [
        EncodeSettings::Jpeg { quality: 80 },
        EncodeSettings::Png,
        EncodeSettings::Webp {
            quality: 80,
            near_lossless: false,
        },
        EncodeSettings::Avif { quality: 80 },
    ] {
        let format = settings.format();
        if !codec.supports(format) {
            println!("  - {:<5} not available in this build", format.label());
            continue;
        }
        match codec.encode(&sample, &settings) {
            Ok(bytes) => println!("  ✓ {:<5} {} bytes for a 64x64 sample", format.label(), bytes.len()),
            Err(e) => {
                println!("  ✗ {:<5} {}", format.label(), e);
                failed = true;
            }
        }
    }

    println!();
    println!("═══════════════════════════════");
    if failed {
        println!("✗ Some encoders failed");
        return ExitCode::FAILURE;
    }
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}

fn print_curve(curve: &QualityCurve) {
    let samples: Vec<String> = [1.0, 25.0, 50.0, 80.0, 100.0]
        .into_iter()
        .map(|q: f64| format!("{}→{}", q, curve.remap(q)))
        .collect();
    println!("✓ Quality curve: {}", samples.join(", "));
    println!(
        "  near-lossless WebP from encoder quality {}",
        curve.near_lossless_threshold()
    );
}

/// Small translucent gradient used to exercise every encoder.
fn sample_image() -> DynamicImage {
    let image = RgbaImage::from_fn(64, 64, |x, y| {
        Rgba([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 200])
    });
    DynamicImage::ImageRgba8(image)
}
