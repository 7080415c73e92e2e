//! Weather tool backed by the OpenWeatherMap API.

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, optional_str, status};
use crate::error::{AssistantError, Result};
use crate::session::Session;

/// Default API base; overridable for tests.
const OPENWEATHERMAP_BASE: &str = "https://api.openweathermap.org/data/2.5";

/// Fetches the current weather or a short forecast.
pub struct CheckWeather {
    api_key: Option<String>,
    base_url: String,
    default_location: String,
    client: reqwest::Client,
}

impl CheckWeather {
    /// Create the tool. `api_key = None` yields a spoken configuration
    /// error instead of a request.
    pub fn new(api_key: Option<String>, default_location: Option<String>) -> Self {
        Self::with_base_url(api_key, default_location, OPENWEATHERMAP_BASE)
    }

    /// Create the tool against a custom API base URL.
    pub fn with_base_url(
        api_key: Option<String>,
        default_location: Option<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key,
            base_url: base_url.into(),
            default_location: default_location.unwrap_or_else(|| "home".to_owned()),
            client: reqwest::Client::new(),
        }
    }

    async fn fetch(&self, path: &str, location: &str, key: &str) -> Result<Value> {
        let url = format!(
            "{}/{}?q={}&appid={}&units=metric",
            self.base_url,
            path,
            urlencoding::encode(location),
            key
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AssistantError::Tool(format!("weather request failed: {e}")))?;

        let ok = response.status().is_success();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Tool(format!("weather response parse failed: {e}")))?;

        if !ok {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            return Err(AssistantError::Tool(format!(
                "failed to fetch weather data: {message}"
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl Tool for CheckWeather {
    fn name(&self) -> &str {
        "check_weather"
    }

    fn description(&self) -> &str {
        "Fetch the current weather or forecast information for a location"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "Only enter a location if looking for anywhere other than home. The name of the location (e.g. city) to get the weather for."
                },
                "forecast": {
                    "type": "boolean",
                    "description": "Set to true to get a short forecast instead of the current weather. Default is false."
                }
            }
        })
    }

    async fn execute(&self, params: &Value, session: &Session) -> Result<Value> {
        let location = optional_str(params, "location").unwrap_or(&self.default_location);
        let forecast = params
            .get("forecast")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        status(session, format!("Fetching weather for {location}.")).await;

        let Some(key) = self.api_key.as_deref() else {
            return Ok(serde_json::json!({
                "text": "Weather lookups are not configured (no API key)."
            }));
        };

        if forecast {
            let body = self.fetch("forecast", location, key).await?;
            let entries = body
                .get("list")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .take(5)
                        .map(|entry| {
                            serde_json::json!({
                                "datetime": entry.get("dt_txt").cloned().unwrap_or(Value::Null),
                                "temperature": entry.pointer("/main/temp").cloned().unwrap_or(Value::Null),
                                "description": entry
                                    .pointer("/weather/0/description")
                                    .cloned()
                                    .unwrap_or(Value::Null),
                            })
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            Ok(serde_json::json!({
                "location": location,
                "forecast": entries,
            }))
        } else {
            let body = self.fetch("weather", location, key).await?;
            Ok(serde_json::json!({
                "location": location,
                "temperature": body.pointer("/main/temp").cloned().unwrap_or(Value::Null),
                "feels_like": body.pointer("/main/feels_like").cloned().unwrap_or(Value::Null),
                "humidity": body.pointer("/main/humidity").cloned().unwrap_or(Value::Null),
                "description": body
                    .pointer("/weather/0/description")
                    .cloned()
                    .unwrap_or(Value::Null),
            }))
        }
    }
}
