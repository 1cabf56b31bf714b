use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::reports::MonthlyStats;

pub const FALLBACK_INSIGHTS: [&str; 3] = [
    "Your highest expense category this month might need attention.",
    "Consider setting up a budget for better financial management.",
    "Track your recurring expenses to identify potential savings.",
];

#[derive(Debug)]
pub enum InsightError {
    ClientBuildFailed(reqwest::Error),
    RequestFailed(reqwest::Error),
    UnexpectedStatus(u16),
    EmptyResponse,
    MalformedResponse(serde_json::Error),
}

impl std::error::Error for InsightError {}

impl fmt::Display for InsightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsightError::ClientBuildFailed(e) => {
                write!(f, "InsightError: Failed to build HTTP client: {e}")
            }
            InsightError::RequestFailed(e) => write!(f, "InsightError: Request failed: {e}"),
            InsightError::UnexpectedStatus(status) => {
                write!(f, "InsightError: Service responded with status {status}")
            }
            InsightError::EmptyResponse => write!(f, "InsightError: Service returned no text"),
            InsightError::MalformedResponse(e) => {
                write!(f, "InsightError: Response was not a JSON array of strings: {e}")
            }
        }
    }
}

#[async_trait]
pub trait GenerateInsights: Send + Sync {
    async fn generate(
        &self,
        stats: &MonthlyStats,
        month_name: &str,
    ) -> Result<Vec<String>, InsightError>;
}

pub type InsightGenerator = Box<dyn GenerateInsights>;

pub fn fallback_insights() -> Vec<String> {
    FALLBACK_INSIGHTS.iter().map(|i| String::from(*i)).collect()
}

/// Never fails. Errors, timeouts and empty results all yield the fallback insights.
pub async fn insights_or_fallback(
    generator: &dyn GenerateInsights,
    stats: &MonthlyStats,
    month_name: &str,
    timeout: Duration,
) -> Vec<String> {
    match tokio::time::timeout(timeout, generator.generate(stats, month_name)).await {
        Ok(Ok(insights)) if !insights.is_empty() => insights,
        Ok(Ok(_)) => {
            log::warn!("Insight generation for {month_name} returned nothing; using fallback");
            fallback_insights()
        }
        Ok(Err(e)) => {
            log::error!("Insight generation for {month_name} failed; using fallback: {e}");
            fallback_insights()
        }
        Err(_) => {
            log::error!(
                "Insight generation for {month_name} timed out after {}s; using fallback",
                timeout.as_secs_f32(),
            );
            fallback_insights()
        }
    }
}

pub struct GeminiInsightGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiInsightGenerator {
    pub fn new(
        api_base_url: &str,
        model: &str,
        api_key: &str,
        request_timeout: Duration,
    ) -> Result<Self, InsightError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(InsightError::ClientBuildFailed)?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:generateContent",
                api_base_url.trim_end_matches('/'),
                model
            ),
            api_key: String::from(api_key),
        })
    }
}

#[async_trait]
impl GenerateInsights for GeminiInsightGenerator {
    async fn generate(
        &self,
        stats: &MonthlyStats,
        month_name: &str,
    ) -> Result<Vec<String>, InsightError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_prompt(stats, month_name),
                }],
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(InsightError::RequestFailed)?;

        if !response.status().is_success() {
            return Err(InsightError::UnexpectedStatus(response.status().as_u16()));
        }

        let response = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(InsightError::RequestFailed)?;

        let text = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect::<String>();

        if text.trim().is_empty() {
            return Err(InsightError::EmptyResponse);
        }

        parse_insights(&text)
    }
}

/// Used when no insight service is configured.
pub struct FallbackInsightGenerator;

#[async_trait]
impl GenerateInsights for FallbackInsightGenerator {
    async fn generate(&self, _: &MonthlyStats, _: &str) -> Result<Vec<String>, InsightError> {
        Ok(fallback_insights())
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

fn build_prompt(stats: &MonthlyStats, month_name: &str) -> String {
    let categories = stats
        .by_category
        .iter()
        .map(|(category, amount)| format!("{category}: ${amount}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Analyze this financial data and provide 3 concise, actionable insights.
Focus on spending patterns and practical advice.
Keep it friendly and conversational.

Financial Data for {month_name}:
- Total Income: ${}
- Total Expenses: ${}
- Net Income: ${}
- Expense Categories: {categories}

Format the response as a JSON array of strings, like this:
[\"insight 1\", \"insight 2\", \"insight 3\"]",
        stats.total_income,
        stats.total_expenses,
        stats.net_income(),
    )
}

/// Parses a JSON array of strings, ignoring Markdown code fences around it.
fn parse_insights(text: &str) -> Result<Vec<String>, InsightError> {
    let mut cleaned = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(fence_start) = rest.find("```") {
        cleaned.push_str(&rest[..fence_start]);
        rest = &rest[fence_start + 3..];
        rest = rest.strip_prefix("json").unwrap_or(rest);
        rest = rest.strip_prefix('\n').unwrap_or(rest);
    }
    cleaned.push_str(rest);

    serde_json::from_str::<Vec<String>>(cleaned.trim()).map_err(InsightError::MalformedResponse)
}
