use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Envelope of one news page. Articles stay as raw JSON so a single malformed
/// item cannot fail the whole page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsPageResponse {
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Every field decodes independently: a value of the wrong JSON type is
/// read as absent instead of failing the article.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawArticle {
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub published_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub snippet: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_entities")]
    pub entities: Option<Vec<RawEntity>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEntity {
    #[serde(default, deserialize_with = "lenient")]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub sentiment_score: Option<f64>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

// Non-object entity items are dropped; the rest of the list survives.
fn lenient_entities<'de, D>(deserializer: D) -> Result<Option<Vec<RawEntity>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };

    Ok(Some(
        items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
    ))
}
