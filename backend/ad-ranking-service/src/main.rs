use actix_web::{middleware, web, App, HttpServer};
use ad_ranking_service::{
    config::TelemetrySink,
    handlers::register_routes,
    metrics,
    services::{
        estimator::{InferenceBackend, ModelSpec, TfServingClient},
        telemetry::{EventPublisher, RedisStreamPublisher},
        user_context::RedisKeyValueStore,
    },
    AdRecommender, Config, Estimator, ReferenceData, TelemetryEmitter, UserContextFetcher,
};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

async fn build_publisher(
    config: &Config,
    redis_client: &redis::Client,
) -> anyhow::Result<Arc<dyn EventPublisher>> {
    match config.telemetry.sink {
        TelemetrySink::Redis => {
            let publisher =
                RedisStreamPublisher::connect(redis_client.clone(), config.telemetry.stream_maxlen)
                    .await
                    .context("Failed to connect telemetry publisher to Redis")?;
            Ok(Arc::new(publisher))
        }
        #[cfg(feature = "kafka")]
        TelemetrySink::Kafka => {
            let publisher = ad_ranking_service::services::telemetry::KafkaPublisher::new(
                &config.telemetry.kafka_brokers,
                config.telemetry.publish_timeout(),
            )
            .context("Failed to create Kafka producer")?;
            Ok(Arc::new(publisher))
        }
        #[cfg(not(feature = "kafka"))]
        TelemetrySink::Kafka => {
            anyhow::bail!("TELEMETRY_SINK=kafka requires the `kafka` feature")
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("Failed to load config")?;
    info!(
        service = %config.service.service_name,
        port = config.service.http_port,
        "Starting ad ranking service"
    );

    let reference =
        ReferenceData::load_and_watch(&config.snapshot).context("Failed to load reference data")?;

    let redis_client =
        redis::Client::open(config.redis.url.clone()).context("Invalid REDIS_URL")?;
    let kv_store = RedisKeyValueStore::connect(redis_client.clone())
        .await
        .context("Failed to connect to Redis")?;
    let user_context = UserContextFetcher::new(Box::new(kv_store), config.redis.timeout());

    let inference = &config.inference;
    let spec = match &inference.model_spec_path {
        Some(path) => ModelSpec::from_file(path).context("Failed to load model spec")?,
        None => ModelSpec::builtin(&inference.model_name, &inference.output_name),
    };
    info!(model = %spec.name, fields = spec.fields.len(), "Model spec loaded");

    let backend: Arc<dyn InferenceBackend> = Arc::new(
        TfServingClient::new(&inference.base_url, &spec.output, inference.timeout())
            .context("Failed to build inference client")?,
    );
    let estimator = Estimator::new(backend, Arc::new(spec), inference.timeout());

    let publisher = build_publisher(&config, &redis_client).await?;
    let telemetry = TelemetryEmitter::new(
        publisher,
        &config.telemetry.rec_ads_stream,
        &config.telemetry.req_ads_stream,
        config.telemetry.publish_timeout(),
    )
    .with_limits(
        config.telemetry.max_in_flight_batches,
        config.telemetry.publish_concurrency,
    );

    let recommender = Arc::new(AdRecommender::new(
        reference,
        user_context,
        estimator,
        telemetry,
        config.policy.clone(),
    ));

    let addr = format!("0.0.0.0:{}", config.service.http_port);
    info!("HTTP server listening on {}", addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(recommender.clone()))
            .wrap(middleware::Logger::default())
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(register_routes)
    })
    .bind(&addr)
    .with_context(|| format!("Failed to bind {}", addr))?
    .run()
    .await?;

    Ok(())
}
