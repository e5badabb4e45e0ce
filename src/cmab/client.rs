//! Remote CMAB decision endpoint.
use std::time::Duration;

use async_trait::async_trait;
use rand::{thread_rng, Rng};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AttributeValue, Attributes, Error, Result};

/// Source of CMAB decisions.
///
/// Implementations own any timeout or cancellation policy; the decision service waits for as
/// long as `fetch_decision` takes.
#[async_trait]
pub trait CmabClient: Send + Sync {
    /// Ask the model behind `rule_id` to pick a variation id for the user.
    async fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &Attributes,
        cmab_uuid: Uuid,
    ) -> Result<String>;
}

/// Configuration for [`HttpCmabClient`].
#[derive(Debug, Clone)]
pub struct HttpCmabClientConfig {
    /// Prediction endpoint. The rule id is appended to it as a path segment.
    ///
    /// Defaults to [`HttpCmabClientConfig::DEFAULT_PREDICTION_ENDPOINT`].
    pub prediction_endpoint: String,
    /// Number of retries after the first failed request.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound of the wait between retries.
    pub max_backoff: Duration,
    /// Factor applied to the wait after each retry.
    pub backoff_multiplier: f64,
    /// Random extra wait added to each backoff so clients don't retry in lockstep.
    pub jitter: Duration,
}

impl HttpCmabClientConfig {
    pub const DEFAULT_PREDICTION_ENDPOINT: &'static str =
        "https://prediction.cmab.optimizely.com/predict";
    pub const DEFAULT_MAX_RETRIES: u32 = 1;
    pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
    pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const DEFAULT_JITTER: Duration = Duration::from_millis(50);

    pub fn new() -> HttpCmabClientConfig {
        HttpCmabClientConfig::default()
    }

    pub fn with_prediction_endpoint(mut self, endpoint: impl Into<String>) -> HttpCmabClientConfig {
        self.prediction_endpoint = endpoint.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> HttpCmabClientConfig {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(
        mut self,
        initial: Duration,
        max: Duration,
        multiplier: f64,
    ) -> HttpCmabClientConfig {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> HttpCmabClientConfig {
        self.jitter = jitter;
        self
    }

    fn endpoint_for(&self, rule_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.prediction_endpoint).map_err(Error::InvalidBaseUrl)?;
        url.path_segments_mut()
            .map_err(|()| Error::InvalidBaseUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(rule_id);
        Ok(url)
    }

    /// Wait before retry number `retry` (starting at 0), without jitter.
    fn backoff(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32);
        let nanos = self.initial_backoff.as_nanos() as f64 * factor;
        if nanos >= self.max_backoff.as_nanos() as f64 {
            self.max_backoff
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}

impl Default for HttpCmabClientConfig {
    fn default() -> HttpCmabClientConfig {
        HttpCmabClientConfig {
            prediction_endpoint: HttpCmabClientConfig::DEFAULT_PREDICTION_ENDPOINT.to_owned(),
            max_retries: HttpCmabClientConfig::DEFAULT_MAX_RETRIES,
            initial_backoff: HttpCmabClientConfig::DEFAULT_INITIAL_BACKOFF,
            max_backoff: HttpCmabClientConfig::DEFAULT_MAX_BACKOFF,
            backoff_multiplier: HttpCmabClientConfig::DEFAULT_BACKOFF_MULTIPLIER,
            jitter: HttpCmabClientConfig::DEFAULT_JITTER,
        }
    }
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    instances: [PredictionInstance<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionInstance<'a> {
    visitor_id: &'a str,
    experiment_id: &'a str,
    attributes: Vec<PredictionAttribute<'a>>,
    #[serde(rename = "cmabUUID")]
    cmab_uuid: Uuid,
}

#[derive(Debug, Serialize)]
struct PredictionAttribute<'a> {
    id: &'a str,
    value: &'a AttributeValue,
    #[serde(rename = "type")]
    attribute_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    variation_id: String,
}

/// [`CmabClient`] calling the prediction endpoint over HTTP, retrying failed requests with
/// exponential backoff.
///
/// Retries sleep with `tokio::time`, so this client must be driven by a Tokio runtime with the
/// time driver enabled.
pub struct HttpCmabClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    config: HttpCmabClientConfig,
}

impl HttpCmabClient {
    pub fn new(config: HttpCmabClientConfig) -> HttpCmabClient {
        HttpCmabClient {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn fetch_once(&self, url: Url, request: &PredictionRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        let body: PredictionResponse = response.json().await?;
        body.predictions
            .into_iter()
            .next()
            .map(|it| it.variation_id)
            .filter(|it| !it.is_empty())
            .ok_or_else(|| Error::CmabFetchFailed {
                rule_id: request.instances[0].experiment_id.to_owned(),
                message: "prediction response has no variation id".to_owned(),
            })
    }
}

#[async_trait]
impl CmabClient for HttpCmabClient {
    async fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &Attributes,
        cmab_uuid: Uuid,
    ) -> Result<String> {
        let url = self.config.endpoint_for(rule_id)?;

        let mut attribute_list: Vec<_> = attributes
            .iter()
            .map(|(id, value)| PredictionAttribute {
                id,
                value,
                attribute_type: "custom_attribute",
            })
            .collect();
        attribute_list.sort_by(|a, b| a.id.cmp(b.id));

        let request = PredictionRequest {
            instances: [PredictionInstance {
                visitor_id: user_id,
                experiment_id: rule_id,
                attributes: attribute_list,
                cmab_uuid,
            }],
        };

        let mut retry = 0;
        loop {
            log::debug!(target: "decision_engine", rule_id, user_id, retry; "fetching CMAB decision");
            match self.fetch_once(url.clone(), &request).await {
                Ok(variation_id) => return Ok(variation_id),
                Err(err) if retry < self.config.max_retries => {
                    let delay = self.config.backoff(retry) + jitter(self.config.jitter);
                    log::warn!(target: "decision_engine",
                               rule_id,
                               retry;
                               "CMAB prediction request failed, retrying in {delay:?}: {err}");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => {
                    return Err(Error::CmabFetchFailed {
                        rule_id: rule_id.to_owned(),
                        message: err.to_string(),
                    })
                }
            }
        }
    }
}

fn jitter(max: Duration) -> Duration {
    thread_rng().gen_range(Duration::ZERO..=max)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[test]
    fn backoff_grows_until_capped() {
        let config = HttpCmabClientConfig::new().with_backoff(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2.0,
        );
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(2), Duration::from_millis(400));
        assert_eq!(config.backoff(3), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..100 {
            assert!(jitter(Duration::from_millis(10)) <= Duration::from_millis(10));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn endpoint_appends_rule_id() {
        let config = HttpCmabClientConfig::new();
        assert_eq!(
            config.endpoint_for("rule-1").unwrap().as_str(),
            "https://prediction.cmab.optimizely.com/predict/rule-1"
        );

        let trailing_slash =
            HttpCmabClientConfig::new().with_prediction_endpoint("http://localhost:8080/predict/");
        assert_eq!(
            trailing_slash.endpoint_for("rule-1").unwrap().as_str(),
            "http://localhost:8080/predict/rule-1"
        );

        for invalid in ["not a url", "mailto:cmab@example.com"] {
            let config = HttpCmabClientConfig::new().with_prediction_endpoint(invalid);
            assert!(matches!(
                config.endpoint_for("rule-1"),
                Err(Error::InvalidBaseUrl(_))
            ));
        }
    }

    #[test]
    fn endpoint_escapes_rule_id() {
        let url = HttpCmabClientConfig::new()
            .endpoint_for("a/b?c d#e")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://prediction.cmab.optimizely.com/predict/a%2Fb%3Fc%20d%23e"
        );
        assert_eq!(url.path_segments().unwrap().count(), 2);
        assert!(url.query().is_none());
    }

    #[test]
    fn request_body_shape() {
        let value = AttributeValue::from("chrome");
        let request = PredictionRequest {
            instances: [PredictionInstance {
                visitor_id: "user",
                experiment_id: "rule",
                attributes: vec![PredictionAttribute {
                    id: "browser",
                    value: &value,
                    attribute_type: "custom_attribute",
                }],
                cmab_uuid: Uuid::nil(),
            }],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "instances": [{
                    "visitorId": "user",
                    "experimentId": "rule",
                    "attributes": [{"id": "browser", "value": "chrome", "type": "custom_attribute"}],
                    "cmabUUID": "00000000-0000-0000-0000-000000000000"
                }]
            })
        );
    }

    #[test]
    fn parses_prediction_response() {
        let body: PredictionResponse =
            serde_json::from_value(json!({"predictions": [{"variation_id": "v1"}]})).unwrap();
        assert_eq!(body.predictions[0].variation_id, "v1");
    }
}
