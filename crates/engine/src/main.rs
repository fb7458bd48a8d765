use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use cinegraph_common::CinegraphError;
use cinegraph_engine::config::{self, EngineConfig};
use cinegraph_engine::pipeline::Pipeline;
use cinegraph_engine::recommend::{self, ParamOverrides};
use cinegraph_engine::server::{self, AppState};
use cinegraph_engine::store::{GraphStore, MemoryStore, Neo4jStore};

#[derive(Parser, Debug)]
#[command(
    name = "cinegraph",
    version,
    about = "Build a movie knowledge graph and query it for recommendations"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "CINEGRAPH_CONFIG_DIR",
        default_value = "config",
        help = "Directory holding system.toml"
    )]
    config_dir: PathBuf,

    #[command(flatten)]
    neo4j: Neo4jArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Neo4jArgs {
    #[arg(long, global = true, env = "NEO4J_URI", default_value = "bolt://localhost:7687")]
    neo4j_uri: String,

    #[arg(long, global = true, env = "NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    #[arg(long, global = true, env = "NEO4J_PASSWORD", default_value = "", hide_env_values = true)]
    neo4j_password: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every construction stage and print the run report
    Build(BuildCmd),
    /// Print recommendations for one user as JSON
    Recommend(RecommendCmd),
    /// Serve recommendations, health and metrics over HTTP
    Serve(ServeCmd),
}

#[derive(Args, Debug)]
struct BuildCmd {
    #[arg(long, help = "Build into an in-memory graph instead of Neo4j")]
    dry_run: bool,

    #[arg(long, value_name = "PATH|URL", help = "Override sources.movies")]
    movies: Option<String>,

    #[arg(long, value_name = "PATH|URL", help = "Override sources.ratings")]
    ratings: Option<String>,

    #[arg(long, value_name = "PATH|URL", help = "Override sources.tags")]
    tags: Option<String>,
}

#[derive(Args, Debug)]
struct RecommendCmd {
    #[arg(value_name = "USER_ID")]
    user_id: String,

    #[arg(long, help = "Ratings strictly above this count as liked")]
    liked: Option<f64>,

    #[arg(long, help = "Minimum imdbRating (exclusive) of a candidate")]
    quality: Option<f64>,

    #[arg(long, help = "Number of top genres to draw from")]
    genres: Option<usize>,

    #[arg(long, help = "Maximum number of results")]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct ServeCmd {
    #[arg(long, env = "CINEGRAPH_PORT", help = "Override server.port")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine; real environment variables still apply.
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut engine_config = match config::load_config(&cli.config_dir) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration, refusing to start");
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Command::Build(cmd) => run_build(&mut engine_config, &cli.neo4j, cmd).await,
        Command::Recommend(cmd) => run_recommend(&engine_config, &cli.neo4j, cmd).await,
        Command::Serve(cmd) => run_serve(&engine_config, &cli.neo4j, cmd).await,
    };

    std::process::exit(code);
}

async fn run_build(engine_config: &mut EngineConfig, neo4j: &Neo4jArgs, cmd: BuildCmd) -> i32 {
    let sources = &mut engine_config.system.sources;
    if let Some(movies) = cmd.movies {
        sources.movies = movies;
    }
    if let Some(ratings) = cmd.ratings {
        sources.ratings = ratings;
    }
    if let Some(tags) = cmd.tags {
        sources.tags = tags;
    }

    let exporter = match &engine_config.system.metrics.listen_addr {
        Some(addr) => addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| e.to_string())
            .and_then(|addr| {
                PrometheusBuilder::new()
                    .with_http_listener(addr)
                    .install()
                    .map_err(|e| e.to_string())
            }),
        None => PrometheusBuilder::new()
            .install_recorder()
            .map(|_| ())
            .map_err(|e| e.to_string()),
    };
    if let Err(e) = exporter {
        tracing::error!(error = %e, "Failed to install Prometheus metrics recorder");
        return 1;
    }

    let store: Arc<dyn GraphStore> = if cmd.dry_run {
        tracing::info!("Dry run, building into an in-memory graph");
        Arc::new(MemoryStore::new())
    } else {
        match connect(engine_config, neo4j).await {
            Some(store) => store,
            None => return 1,
        }
    };

    let pipeline = Pipeline::new(store, engine_config.system.clone());
    match pipeline.build().await {
        Ok(report) => {
            print_json(&report);
            0
        }
        Err(abort) => {
            let error = CinegraphError::from(abort.error);
            tracing::error!(
                error = %error,
                hard_dependency = error.is_hard_dependency(),
                data_error = error.is_data_error(),
                "Graph build aborted"
            );
            print_json(&abort.report);
            1
        }
    }
}

async fn run_recommend(engine_config: &EngineConfig, neo4j: &Neo4jArgs, cmd: RecommendCmd) -> i32 {
    let overrides = ParamOverrides {
        liked: cmd.liked,
        quality: cmd.quality,
        genres: cmd.genres,
        limit: cmd.limit,
    };
    let params = overrides.apply(&engine_config.system.recommendation);

    let Some(store) = connect(engine_config, neo4j).await else {
        return 1;
    };

    match recommend::recommend(store.as_ref(), &cmd.user_id, &params).await {
        Ok(results) => {
            print_json(&results);
            0
        }
        Err(e) => {
            tracing::error!(user_id = %cmd.user_id, error = %e, "Recommendation query failed");
            1
        }
    }
}

async fn run_serve(engine_config: &EngineConfig, neo4j: &Neo4jArgs, cmd: ServeCmd) -> i32 {
    let metrics_handle: PrometheusHandle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus metrics recorder");
            return 1;
        }
    };

    let Some(store) = connect(engine_config, neo4j).await else {
        return 1;
    };

    let state = Arc::new(AppState {
        store,
        params: engine_config.system.recommendation.clone(),
        metrics_handle,
    });

    let port = cmd.port.unwrap_or(engine_config.system.server.port);
    match server::serve(state, port).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(port, error = %e, "HTTP server error");
            1
        }
    }
}

async fn connect(engine_config: &EngineConfig, neo4j: &Neo4jArgs) -> Option<Arc<dyn GraphStore>> {
    match Neo4jStore::connect(
        &neo4j.neo4j_uri,
        &neo4j.neo4j_user,
        &neo4j.neo4j_password,
        &engine_config.system.retry.database,
    )
    .await
    {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to Neo4j");
            None
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    if let Err(e) = write_json(value) {
        tracing::error!(error = %e, "Failed to write output");
    }
}

fn write_json<T: serde::Serialize>(value: &T) -> Result<(), CinegraphError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
