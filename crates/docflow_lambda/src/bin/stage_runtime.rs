use aws_config::BehaviorVersion;
use docflow_core::contract::StageId;
use docflow_lambda::adapters::inference::BedrockInferenceModel;
use docflow_lambda::adapters::invoke::AwsLambdaStageInvoker;
use docflow_lambda::adapters::object_store::S3ObjectStore;
use docflow_lambda::adapters::parameters::{ApiKeyResolver, SsmSecretSource};
use docflow_lambda::adapters::search::TavilySearch;
use docflow_lambda::adapters::state_store::DynamoDbStateStore;
use docflow_lambda::config::RuntimeConfig;
use docflow_lambda::handlers::{handle_stage_event, ApiGatewayResponse, StageContext};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

struct RuntimeDependencies {
    config: RuntimeConfig,
    store: DynamoDbStateStore,
    invoker: AwsLambdaStageInvoker,
    objects: S3ObjectStore,
    model: BedrockInferenceModel,
    search: TavilySearch,
}

impl RuntimeDependencies {
    async fn load(config: RuntimeConfig) -> Result<Self, Error> {
        let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;

        let mut api_keys = ApiKeyResolver::configured(config.research.tavily_api_key.clone());
        // Only research calls the search API.
        if config.stage == StageId::Research {
            api_keys = api_keys.with_parameter_store(
                config.research.tavily_api_key_parameter.clone(),
                Box::new(SsmSecretSource::new(aws_sdk_ssm::Client::new(&aws_config))),
            );
        }
        let search =
            TavilySearch::new(api_keys).map_err(|error| Error::from(error.to_string()))?;

        Ok(Self {
            store: DynamoDbStateStore::new(
                aws_sdk_dynamodb::Client::new(&aws_config),
                config.coordinator.table_name.clone(),
            ),
            invoker: AwsLambdaStageInvoker::new(aws_sdk_lambda::Client::new(&aws_config)),
            objects: S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config)),
            model: BedrockInferenceModel::new(aws_sdk_bedrockruntime::Client::new(&aws_config)),
            search,
            config,
        })
    }

    fn context(&self) -> StageContext<'_> {
        StageContext {
            config: &self.config,
            store: &self.store,
            invoker: &self.invoker,
            objects: &self.objects,
            model: &self.model,
            search: &self.search,
        }
    }
}

async fn handle_request(
    deps: &RuntimeDependencies,
    event: LambdaEvent<Value>,
) -> Result<ApiGatewayResponse, Error> {
    handle_stage_event(event.payload, &deps.context()).map_err(Error::from)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .json()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let config = RuntimeConfig::from_env().map_err(Error::from)?;
    info!(
        stage = %config.stage,
        table = %config.coordinator.table_name,
        chain = ?config.coordinator.chain.stages(),
        timeout_seconds = config.coordinator.limits.timeout_seconds,
        memory_mb = config.coordinator.limits.memory_mb,
        "stage_runtime_starting"
    );

    let deps = RuntimeDependencies::load(config).await?;
    let deps = &deps;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle_request(deps, event).await
    }))
    .await
}
