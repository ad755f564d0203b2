//! Tools the hosted model may call while answering a conversational prompt.
//!
//! Web search, weather and stock price return canned data. The news lookup
//! calls NewsData.io when a key is configured and reports every failure as a
//! single explanatory result rather than an error, so the model can relay it.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::message::Source;

// Same reserved set as JavaScript's encodeURIComponent.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const MAX_NEWS_RESULTS: usize = 5;

lazy_static::lazy_static! {
    static ref KNOWN_TECH: Regex = Regex::new(r"(?i)next\.js|genkit|tailwind").expect("static regex");
    static ref WEATHER_HINT: Regex = Regex::new(r"(?i)\b(weather|temperature|forecast|rain(ing|y)?)\b").expect("static regex");
    static ref STOCK_HINT: Regex = Regex::new(r"(?i)\b(stocks?|share price|ticker|market value)\b").expect("static regex");
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl SearchResult {
    fn new(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    SearchWeb,
    LatestNews,
    CurrentWeather,
    StockPrice,
}

impl Tool {
    pub const ALL: [Tool; 4] = [Tool::SearchWeb, Tool::LatestNews, Tool::CurrentWeather, Tool::StockPrice];

    pub fn name(self) -> &'static str {
        match self {
            Tool::SearchWeb => "searchWeb",
            Tool::LatestNews => "getLatestNews",
            Tool::CurrentWeather => "getCurrentWeather",
            Tool::StockPrice => "getStockPrice",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Function declaration in the model API's schema dialect.
    pub fn declaration(self) -> Value {
        let (description, param, param_description) = match self {
            Tool::SearchWeb => (
                "Searches the web for information on a given topic.",
                "query",
                "The search query.",
            ),
            Tool::LatestNews => (
                "Gets the latest news articles for a given topic.",
                "query",
                "The topic to search for news on.",
            ),
            Tool::CurrentWeather => (
                "Returns the current weather conditions for a given city.",
                "city",
                "The city to get weather information for.",
            ),
            Tool::StockPrice => (
                "Returns the current market value of a stock.",
                "ticker",
                "The ticker symbol of the stock.",
            ),
        };
        json!({
            "name": self.name(),
            "description": description,
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    param: { "type": "STRING", "description": param_description }
                },
                "required": [param]
            }
        })
    }
}

/// Which tools to offer for a prompt. Search and news are always offered.
pub fn select_tools(prompt: &str) -> Vec<Tool> {
    let mut tools = vec![Tool::SearchWeb, Tool::LatestNews];
    if WEATHER_HINT.is_match(prompt) {
        tools.push(Tool::CurrentWeather);
    }
    if STOCK_HINT.is_match(prompt) {
        tools.push(Tool::StockPrice);
    }
    tools
}

/// Result of one tool invocation: the payload returned to the model plus any
/// citations it yielded.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: Value,
    pub citations: Vec<Source>,
}

impl ToolOutput {
    fn plain(value: Value) -> Self {
        Self {
            value,
            citations: Vec::new(),
        }
    }

    fn results(results: Vec<SearchResult>) -> Self {
        let citations = results
            .iter()
            .filter(|r| r.url != "#")
            .map(|r| Source {
                title: r.title.clone(),
                url: r.url.clone(),
            })
            .collect();
        Self {
            value: json!({ "results": results }),
            citations,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolBox {
    client: Client,
    news_api_base: String,
    news_api_key: String,
}

impl ToolBox {
    pub fn new(client: Client, news_api_base: impl Into<String>, news_api_key: impl Into<String>) -> Self {
        Self {
            client,
            news_api_base: news_api_base.into(),
            news_api_key: news_api_key.into(),
        }
    }

    #[instrument(skip(self, args))]
    pub async fn invoke(&self, name: &str, args: &Value) -> ToolOutput {
        let arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        match Tool::from_name(name) {
            Some(Tool::SearchWeb) => ToolOutput::results(search_web(&arg("query"))),
            Some(Tool::LatestNews) => ToolOutput::results(
                latest_news(&self.client, &self.news_api_base, &self.news_api_key, &arg("query")).await,
            ),
            Some(Tool::CurrentWeather) => ToolOutput::plain(json!({ "result": current_weather(&arg("city")) })),
            Some(Tool::StockPrice) => ToolOutput::plain(json!({ "result": stock_price(&arg("ticker")) })),
            None => {
                warn!(name, "Model requested an unknown tool");
                ToolOutput::plain(json!({ "error": format!("Unknown tool: {name}") }))
            }
        }
    }
}

pub fn search_web(query: &str) -> Vec<SearchResult> {
    info!(query, "Simulating web search");
    if KNOWN_TECH.is_match(query) {
        return vec![
            SearchResult::new(
                "Official Next.js Documentation",
                "https://nextjs.org/docs",
                "The official documentation for Next.js, a popular React framework.",
            ),
            SearchResult::new(
                "Genkit AI Developer Docs",
                "https://firebase.google.com/docs/genkit",
                "Genkit is an open source framework from Google that helps you build, deploy, and monitor production-ready AI apps.",
            ),
            SearchResult::new(
                "Tailwind CSS - Official Site",
                "https://tailwindcss.com/",
                "A utility-first CSS framework for rapidly building custom designs.",
            ),
        ];
    }

    let encoded = utf8_percent_encode(query, URI_COMPONENT).to_string();
    let site_result = |site: &str| {
        let host: String = site.to_lowercase().split_whitespace().collect();
        SearchResult::new(
            format!("{site}: {query}"),
            format!("https://www.{host}.com/search?q={encoded}"),
            format!("A detailed article from {site} explaining various aspects of {query}."),
        )
    };
    vec![
        SearchResult::new(
            format!("Wikipedia: {query}"),
            format!("https://en.wikipedia.org/wiki/{encoded}"),
            format!("The Wikipedia entry for {query}, providing a comprehensive overview."),
        ),
        site_result("TechCrunch"),
        site_result("Investopedia"),
    ]
}

#[derive(Debug, Deserialize)]
struct NewsArticle {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
}

#[instrument(skip(client, api_key))]
pub async fn latest_news(client: &Client, api_base: &str, api_key: &str, query: &str) -> Vec<SearchResult> {
    if api_key.is_empty() {
        return vec![SearchResult::new(
            "API Key not configured",
            "#",
            "The NewsData.io API key is not configured.",
        )];
    }

    let url = format!("{}/api/1/news", api_base.trim_end_matches('/'));
    let response = match client
        .get(&url)
        .query(&[("apikey", api_key), ("q", query), ("language", "en")])
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "News request failed");
            return vec![request_failed(&e.to_string())];
        }
    };

    let status = response.status();
    let body: Value = match response.json().await {
        Ok(v) => v,
        Err(e) if status.is_success() => {
            error!(error = %e, "News response was not JSON");
            return vec![request_failed(&e.to_string())];
        }
        Err(_) => Value::Null,
    };

    if !status.is_success() {
        let detail = body
            .pointer("/results/message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown status").to_string());
        warn!(%status, detail, "News API returned an error");
        return vec![SearchResult::new("API Error", "#", format!("Failed to fetch news: {detail}"))];
    }

    let articles: Vec<NewsArticle> = body
        .get("results")
        .cloned()
        .and_then(|r| serde_json::from_value(r).ok())
        .unwrap_or_default();
    if articles.is_empty() {
        return vec![SearchResult::new(
            "No news found",
            "#",
            format!("No recent news articles found for \"{query}\"."),
        )];
    }

    debug!(count = articles.len(), "News articles received");
    articles
        .into_iter()
        .take(MAX_NEWS_RESULTS)
        .map(|a| {
            SearchResult::new(
                a.title.unwrap_or_default(),
                a.link.unwrap_or_else(|| "#".to_string()),
                a.description.unwrap_or_else(|| "No snippet available.".to_string()),
            )
        })
        .collect()
}

fn request_failed(reason: &str) -> SearchResult {
    SearchResult::new(
        "Request Failed",
        "#",
        format!("Failed to fetch news from NewsData.io: {reason}"),
    )
}

pub fn current_weather(city: &str) -> String {
    format!("The current weather in {city} is sunny with a temperature of 25 degrees Celsius.")
}

pub fn stock_price(_ticker: &str) -> f64 {
    123.45
}
