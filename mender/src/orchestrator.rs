//! Orchestration of the headline operations: `call`, `extract`,
//! `transform` and `generate_schema`.
//!
//! Responsibilities:
//! - Resolve the input (inline config, cached config, or stored id).
//! - Drive the self-healing loop: execute, and on a repairable failure feed
//!   the error back into the endpoint synthesizer, up to the repair cap.
//! - Apply cache-mode semantics for config reads and writes.
//! - Record every invocation as an append-only run and notify webhooks.

use crate::config::MenderConfig;
use crate::docs::DocumentationFetcher;
use crate::error::{MenderError, MenderResult};
use crate::executor::{navigate_data_path, RequestExecutor};
use crate::files;
use crate::http::{CallOptions, HttpCaller, HttpRequest, HttpTransport, ReqwestTransport};
use crate::interpolate;
use crate::llm::{ChatMessage, LlmProvider, OpenAiLlmProvider};
use crate::queue::JobQueue;
use crate::schema::validate_and_apply;
use crate::store::Datastore;
use crate::synth::{
    EndpointSynthesizer, ExtractSynthesizer, RepairContext, SchemaGenerator, TransformInput,
    TransformSynthesizer,
};
use crate::types::{
    ApiConfig, ExtractConfig, RequestOptions, RunConfig, RunResult, TransformConfig,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Cap on synthesize-execute repair iterations for one call.
const MAX_REPAIR_ITERATIONS: u32 = 5;

/// Default per-call HTTP timeout.
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

/// File downloads get a longer deadline.
const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 300;

/// Input to `call`: an inline (possibly partial) config, or a stored id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallInput {
    Endpoint(Box<ApiConfig>),
    Id(String),
}

/// Input to `extract`: an inline config, a stored id, or raw file bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractInput {
    Endpoint(Box<ExtractConfig>),
    Id(String),
    File {
        name: String,
        #[serde(with = "serde_bytes_base64")]
        bytes: Vec<u8>,
    },
}

/// Base64 (de)serialization for inline file payloads.
mod serde_bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// The assembled pipeline. One instance serves all concurrent calls.
pub struct Mender {
    store: Arc<dyn Datastore>,
    endpoint_synth: EndpointSynthesizer,
    extract_synth: ExtractSynthesizer,
    transform_synth: TransformSynthesizer,
    schema_gen: SchemaGenerator,
    executor: RequestExecutor,
    caller: HttpCaller,
    webhook_client: reqwest::Client,
    pub queue: JobQueue,
}

fn call_options(options: &RequestOptions, default_timeout_secs: u64) -> CallOptions {
    CallOptions {
        retries: options.retries.unwrap_or(5),
        retry_delay: Duration::from_millis(options.retry_delay.unwrap_or(1000)),
        timeout: Duration::from_millis(
            options.timeout.unwrap_or(default_timeout_secs * 1000),
        ),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

impl Mender {
    /// Assemble the pipeline from explicit collaborators. Tests inject stub
    /// providers and transports here.
    pub fn new(
        store: Arc<dyn Datastore>,
        llm: Arc<dyn LlmProvider>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let docs = Arc::new(DocumentationFetcher::new());
        let caller = HttpCaller::new(Arc::clone(&transport));
        Self {
            store,
            endpoint_synth: EndpointSynthesizer::new(Arc::clone(&llm), Arc::clone(&docs)),
            extract_synth: ExtractSynthesizer::new(Arc::clone(&llm), docs),
            transform_synth: TransformSynthesizer::new(Arc::clone(&llm)),
            schema_gen: SchemaGenerator::new(llm),
            executor: RequestExecutor::new(HttpCaller::new(transport)),
            caller,
            webhook_client: reqwest::Client::new(),
            queue: JobQueue::new(),
        }
    }

    /// Assemble the production pipeline from process configuration.
    pub fn from_config(config: &MenderConfig, store: Arc<dyn Datastore>) -> MenderResult<Self> {
        let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiLlmProvider::new(config.llm.clone())?);
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
        Ok(Self::new(store, llm, transport))
    }

    /// The headline operation: resolve or synthesize an `ApiConfig`, execute
    /// it (repairing on failure), reshape the payload, and record the run.
    pub async fn call(
        &self,
        input: CallInput,
        payload: Value,
        credentials: Value,
        options: RequestOptions,
    ) -> MenderResult<RunResult> {
        let started_at = Utc::now();
        let outcome = self
            .execute_call(&input, &payload, &credentials, &options)
            .await;

        let (success, data, error, config) = match outcome {
            Ok((data, config)) => (true, Some(data), None, config),
            Err((e, config)) => (false, None, Some(e.to_string()), config),
        };
        let run = RunResult {
            id: Uuid::new_v4().to_string(),
            success,
            data,
            error,
            started_at,
            completed_at: Utc::now(),
            config: RunConfig::Api(config),
        };
        self.finish_run(&run, &options).await;
        Ok(run)
    }

    async fn execute_call(
        &self,
        input: &CallInput,
        payload: &Value,
        credentials: &Value,
        options: &RequestOptions,
    ) -> Result<(Value, ApiConfig), (MenderError, ApiConfig)> {
        // Resolve the starting config: stored id, cache hit, or synthesis
        // input. An inline input doubles as the synthesis seed.
        let (seed, mut current): (ApiConfig, Option<ApiConfig>) = match input {
            CallInput::Id(id) => {
                let stored = self
                    .store
                    .get_api_config(id)
                    .await
                    .and_then(|c| {
                        c.ok_or_else(|| {
                            MenderError::Configuration(format!("no api config with id '{}'", id))
                        })
                    })
                    .map_err(|e| (e, ApiConfig::new(id.clone(), "")))?;
                (stored.clone(), Some(stored))
            }
            CallInput::Endpoint(partial) => {
                let mut cached = None;
                if options.cache_mode.reads() {
                    let id =
                        crate::schema::config_fingerprint(&partial.instruction, payload);
                    cached = self
                        .store
                        .get_api_config(&id)
                        .await
                        .map_err(|e| (e, (**partial).clone()))?;
                    if cached.is_some() {
                        log::debug!("call: api config cache hit for {}", id);
                    }
                }
                ((**partial).clone(), cached)
            }
        };

        let http_options = call_options(options, DEFAULT_CALL_TIMEOUT_SECS);
        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut repair: Option<RepairContext> = None;
        let mut synthesized = false;

        for attempt in 0..=MAX_REPAIR_ITERATIONS {
            let config = match current.take() {
                Some(config) => config,
                None => {
                    let prepared = self
                        .endpoint_synth
                        .prepare_endpoint(
                            &seed,
                            payload,
                            credentials,
                            repair.as_ref(),
                            std::mem::take(&mut messages),
                            attempt,
                        )
                        .await
                        .map_err(|e| (e, seed.clone()))?;
                    messages = prepared.messages;
                    synthesized = true;
                    prepared.config
                }
            };

            match self
                .executor
                .call(&config, payload, credentials, &http_options)
                .await
            {
                Ok(outcome) => {
                    if !outcome.data_path_success {
                        log::warn!(
                            "call: dataPath '{}' did not fully resolve",
                            config.data_path.as_deref().unwrap_or("")
                        );
                    }
                    let data = self
                        .apply_transform(
                            options,
                            &config.instruction,
                            config.response_schema.clone(),
                            config.response_mapping.clone(),
                            outcome.data,
                        )
                        .await
                        .map_err(|e| (e, config.clone()))?;

                    if synthesized && options.cache_mode.writes() {
                        if let Err(e) = self.store.upsert_api_config(&config.id, &config).await
                        {
                            log::warn!("call: failed to cache api config: {}", e);
                        }
                    }
                    return Ok((data, config));
                }
                // Synthesis-driven failures loop back with the error as
                // context; everything else surfaces immediately. A body
                // template that is not JSON after interpolation counts: the
                // synthesizer wrote it.
                Err(e)
                    if attempt < MAX_REPAIR_ITERATIONS
                        && (e.is_repairable()
                            || matches!(
                                e,
                                MenderError::UnresolvedVariables(_) | MenderError::Parse(_)
                            )) =>
                {
                    log::info!(
                        "call: attempt {} failed, re-invoking synthesizer: {}",
                        attempt + 1,
                        e
                    );
                    repair = Some(RepairContext::new(e.to_string(), &config));
                }
                Err(e) => return Err((e, config)),
            }
        }

        Err((
            MenderError::Http {
                status: 0,
                body: format!("giving up after {} repair attempts", MAX_REPAIR_ITERATIONS),
                request_summary: seed.url_host.clone(),
            },
            seed,
        ))
    }

    /// Extract: obtain bytes (download or inline), decompress, parse,
    /// navigate, then transform like any other payload.
    pub async fn extract(
        &self,
        input: ExtractInput,
        payload: Value,
        credentials: Value,
        options: RequestOptions,
    ) -> MenderResult<RunResult> {
        let started_at = Utc::now();
        let outcome = self
            .execute_extract(&input, &payload, &credentials, &options)
            .await;

        let (success, data, error, config) = match outcome {
            Ok((data, config)) => (true, Some(data), None, config),
            Err((e, config)) => (false, None, Some(e.to_string()), config),
        };
        let run = RunResult {
            id: Uuid::new_v4().to_string(),
            success,
            data,
            error,
            started_at,
            completed_at: Utc::now(),
            config: RunConfig::Extract(config),
        };
        self.finish_run(&run, &options).await;
        Ok(run)
    }

    async fn execute_extract(
        &self,
        input: &ExtractInput,
        payload: &Value,
        credentials: &Value,
        options: &RequestOptions,
    ) -> Result<(Value, ExtractConfig), (MenderError, ExtractConfig)> {
        // Inline file bytes short-circuit config resolution entirely.
        if let ExtractInput::File { name, bytes } = input {
            let mut config = ExtractConfig::new(
                crate::schema::config_fingerprint(name, payload),
                format!("file://{}", name),
            );
            config.instruction = format!("parse uploaded file {}", name);
            let data = self
                .parse_file_bytes(bytes, &config, options)
                .await
                .map_err(|e| (e, config.clone()))?;
            return Ok((data, config));
        }

        let (seed, mut current): (ExtractConfig, Option<ExtractConfig>) = match input {
            ExtractInput::Id(id) => {
                let stored = self
                    .store
                    .get_extract_config(id)
                    .await
                    .and_then(|c| {
                        c.ok_or_else(|| {
                            MenderError::Configuration(format!(
                                "no extract config with id '{}'",
                                id
                            ))
                        })
                    })
                    .map_err(|e| (e, ExtractConfig::new(id.clone(), "")))?;
                (stored.clone(), Some(stored))
            }
            ExtractInput::Endpoint(partial) => {
                let mut cached = None;
                if options.cache_mode.reads() {
                    let id =
                        crate::schema::config_fingerprint(&partial.instruction, payload);
                    cached = self
                        .store
                        .get_extract_config(&id)
                        .await
                        .map_err(|e| (e, (**partial).clone()))?;
                }
                // Without an instruction there is nothing to synthesize:
                // treat the inline config as ready to execute.
                let ready = cached.or_else(|| {
                    if partial.instruction.is_empty() {
                        let mut config = (**partial).clone();
                        config.id =
                            crate::schema::config_fingerprint(&config.url_host, payload);
                        Some(config)
                    } else {
                        None
                    }
                });
                ((**partial).clone(), ready)
            }
            ExtractInput::File { .. } => unreachable!("handled above"),
        };

        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut repair: Option<RepairContext> = None;
        let mut synthesized = false;

        for attempt in 0..=MAX_REPAIR_ITERATIONS {
            let config = match current.take() {
                Some(config) => config,
                None => {
                    let prepared = self
                        .extract_synth
                        .prepare_extract(
                            &seed,
                            payload,
                            credentials,
                            repair.as_ref(),
                            std::mem::take(&mut messages),
                            attempt,
                        )
                        .await
                        .map_err(|e| (e, seed.clone()))?;
                    messages = prepared.messages;
                    synthesized = true;
                    prepared.config
                }
            };

            match self
                .fetch_and_parse(&config, payload, credentials, options)
                .await
            {
                Ok(data) => {
                    let data = self
                        .apply_transform(
                            options,
                            &config.instruction,
                            config.response_schema.clone(),
                            config.response_mapping.clone(),
                            data,
                        )
                        .await
                        .map_err(|e| (e, config.clone()))?;
                    if synthesized && options.cache_mode.writes() {
                        if let Err(e) =
                            self.store.upsert_extract_config(&config.id, &config).await
                        {
                            log::warn!("extract: failed to cache config: {}", e);
                        }
                    }
                    return Ok((data, config));
                }
                Err(e)
                    if attempt < MAX_REPAIR_ITERATIONS
                        && (e.is_repairable()
                            || matches!(
                                e,
                                MenderError::UnresolvedVariables(_) | MenderError::Parse(_)
                            )) =>
                {
                    log::info!(
                        "extract: attempt {} failed, re-invoking synthesizer: {}",
                        attempt + 1,
                        e
                    );
                    repair = Some(RepairContext::new(e.to_string(), &config));
                }
                Err(e) => return Err((e, config)),
            }
        }

        Err((
            MenderError::Parse(format!(
                "giving up after {} extract attempts",
                MAX_REPAIR_ITERATIONS
            )),
            seed,
        ))
    }

    /// Download the file behind an extract config and parse it.
    async fn fetch_and_parse(
        &self,
        config: &ExtractConfig,
        payload: &Value,
        credentials: &Value,
        options: &RequestOptions,
    ) -> MenderResult<Value> {
        let mut vars = std::collections::HashMap::new();
        for source in [payload, credentials] {
            if let Value::Object(map) = source {
                for (key, value) in map {
                    vars.insert(key.clone(), value.clone());
                }
            }
        }
        let known: Vec<String> = vars.keys().cloned().collect();
        let mut templates: Vec<&str> = vec![config.url_host.as_str()];
        if let Some(p) = &config.url_path {
            templates.push(p);
        }
        if let Some(h) = &config.headers {
            templates.extend(h.values().map(|v| v.as_str()));
        }
        if let Some(q) = &config.query_params {
            templates.extend(q.values().map(|v| v.as_str()));
        }
        if let Some(b) = &config.body {
            templates.push(b);
        }
        let unbound = interpolate::unbound_in(templates, &known);
        if !unbound.is_empty() {
            return Err(MenderError::UnresolvedVariables(unbound));
        }

        let host = interpolate::interpolate(&config.url_host, &vars)?;
        let mut url = host.trim_end_matches('/').to_string();
        if let Some(path) = &config.url_path {
            let path = interpolate::interpolate(path, &vars)?;
            if !path.is_empty() {
                url = format!("{}/{}", url, path.trim_start_matches('/'));
            }
        }
        let mut request = HttpRequest::new(config.method, url);
        if let Some(headers) = &config.headers {
            for (key, value) in headers {
                request
                    .headers
                    .insert(key.clone(), interpolate::interpolate(value, &vars)?);
            }
        }
        if let Some(params) = &config.query_params {
            let mut pairs: Vec<(String, String)> = Vec::new();
            for (key, value) in params {
                pairs.push((key.clone(), interpolate::interpolate(value, &vars)?));
            }
            pairs.sort();
            request.query_params = pairs;
        }
        if let Some(body) = &config.body {
            let value = interpolate::interpolate_body(body, &vars)?;
            request.body = Some(value.to_string());
        }

        let http_options = call_options(options, DEFAULT_EXTRACT_TIMEOUT_SECS);
        let bytes = self.caller.fetch_raw(&request, &http_options).await?;
        self.parse_file_bytes(&bytes, config, options).await
    }

    async fn parse_file_bytes(
        &self,
        bytes: &[u8],
        config: &ExtractConfig,
        _options: &RequestOptions,
    ) -> MenderResult<Value> {
        let decompressed = files::decompress(bytes, config.decompression_method)?;
        let parsed = files::parse(&decompressed, config.file_type)?;
        match config.data_path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => {
                let (value, ok) = navigate_data_path(&parsed, path);
                if !ok {
                    log::warn!("extract: dataPath '{}' did not fully resolve", path);
                }
                Ok(value)
            }
            None => Ok(parsed),
        }
    }

    /// Standalone transform operation.
    pub async fn transform(
        &self,
        input: TransformInput,
        data: Value,
        options: RequestOptions,
    ) -> MenderResult<RunResult> {
        let started_at = Utc::now();
        let result = self.execute_transform(&input, &data, &options).await;

        let (success, data, error, config) = match result {
            Ok((data, config)) => (true, Some(data), None, config),
            Err((e, config)) => (false, None, Some(e.to_string()), config),
        };
        let run = RunResult {
            id: Uuid::new_v4().to_string(),
            success,
            data,
            error,
            started_at,
            completed_at: Utc::now(),
            config: RunConfig::Transform(config),
        };
        self.finish_run(&run, &options).await;
        Ok(run)
    }

    async fn execute_transform(
        &self,
        input: &TransformInput,
        data: &Value,
        options: &RequestOptions,
    ) -> Result<(Value, TransformConfig), (MenderError, TransformConfig)> {
        let placeholder = || TransformConfig {
            id: crate::schema::transform_cache_id(&input.instruction, data),
            version: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            instruction: input.instruction.clone(),
            response_schema: input.response_schema.clone(),
            response_mapping: input.response_mapping.clone(),
            confidence: None,
            confidence_reasoning: None,
        };

        if is_empty_value(&input.response_schema) || is_empty_value(data) {
            return Err((
                MenderError::Configuration(
                    "transform requires a response schema and non-empty data".to_string(),
                ),
                placeholder(),
            ));
        }

        self.resolve_transform(input, data, options)
            .await
            .map_err(|e| (e, placeholder()))
    }

    /// Transform stage shared by `call` and `extract`. Without a response
    /// schema the raw payload passes through untouched.
    async fn apply_transform(
        &self,
        options: &RequestOptions,
        instruction: &str,
        response_schema: Option<Value>,
        response_mapping: Option<String>,
        data: Value,
    ) -> MenderResult<Value> {
        let schema = match response_schema {
            Some(s) if !is_empty_value(&s) => s,
            _ => return Ok(data),
        };
        if is_empty_value(&data) {
            return Ok(data);
        }
        let input = TransformInput {
            instruction: instruction.to_string(),
            response_schema: schema,
            response_mapping,
        };
        let (transformed, _) = self.resolve_transform(&input, &data, options).await?;
        Ok(transformed)
    }

    /// Obtain a transform config (cache, caller-supplied or synthesized),
    /// apply its mapping and validate. A cached mapping that no longer
    /// validates is unsealed: the cache is bypassed and the mapping
    /// regenerated once.
    async fn resolve_transform(
        &self,
        input: &TransformInput,
        data: &Value,
        options: &RequestOptions,
    ) -> MenderResult<(Value, TransformConfig)> {
        let mut from_cache = options.cache_mode.reads();
        loop {
            let config = self
                .transform_synth
                .prepare_transform(self.store.as_ref(), from_cache, input, data)
                .await?
                .ok_or_else(|| MenderError::MappingValidation {
                    path: "$".to_string(),
                    message: "unable to synthesize a mapping that validates".to_string(),
                })?;

            let mapping = config
                .response_mapping
                .clone()
                .unwrap_or_else(|| "$".to_string());
            match validate_and_apply(data, &mapping, &input.response_schema) {
                Ok(transformed) => {
                    if options.cache_mode.writes() {
                        if let Err(e) =
                            self.store.upsert_transform_config(&config.id, &config).await
                        {
                            log::warn!("transform: failed to cache config: {}", e);
                        }
                    }
                    return Ok((transformed, config));
                }
                Err(e) if from_cache => {
                    log::info!("cached mapping no longer validates, regenerating: {}", e);
                    from_cache = false;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run a call in the background, deduplicated by config fingerprint:
    /// while a synthesis job for the same (instruction, payload shape) is in
    /// flight, further requests are dropped. The result reaches the caller
    /// through the run log and the webhook, if configured. Returns whether
    /// the job was accepted.
    pub fn enqueue_call(
        self: &Arc<Self>,
        input: CallInput,
        payload: Value,
        credentials: Value,
        options: RequestOptions,
    ) -> (String, bool) {
        let id = match &input {
            CallInput::Id(id) => id.clone(),
            CallInput::Endpoint(partial) => {
                crate::schema::config_fingerprint(&partial.instruction, &payload)
            }
        };
        let this = Arc::clone(self);
        let accepted = self.queue.enqueue(
            id.clone(),
            Box::pin(async move {
                this.call(input, payload, credentials, options).await.map(|_| ())
            }),
        );
        (id, accepted)
    }

    /// Generate a JSON Schema from an instruction and optional sample data.
    pub async fn generate_schema(
        &self,
        instruction: &str,
        response_data: Option<&str>,
    ) -> MenderResult<Value> {
        self.schema_gen.generate_schema(instruction, response_data).await
    }

    /// Record the run and fire the webhook, both best-effort.
    async fn finish_run(&self, run: &RunResult, options: &RequestOptions) {
        if let Err(e) = self.store.append_run(run).await {
            log::error!("failed to record run {}: {}", run.id, e);
        }
        if let Some(url) = &options.webhook_url {
            let outcome = self
                .webhook_client
                .post(url)
                .json(run)
                .send()
                .await;
            if let Err(e) = outcome {
                log::warn!("webhook delivery to {} failed: {}", url, e);
            }
        }
    }

    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }
}
