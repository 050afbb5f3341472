//! SVG statistic cards.
//!
//! The cards are a thin presentation adapter: the collectors hand their
//! numbers over and this module substitutes them into fixed SVG shells.
//! No layout algorithms live here.

use crate::errors::ApiError;
use crate::handlers::{
    Context, build_stats, user_token_header, validated_username, verify_api_key,
};
use crate::partial::PartialReport;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, header::CONTENT_TYPE};
use axum::response::{IntoResponse as _, Response};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct CardQuery {
    pub theme: Option<String>,
    #[serde(default)]
    pub no_cache: bool,
}

struct Theme {
    background: &'static str,
    title: &'static str,
    text: &'static str,
    accent: &'static str,
}

fn theme_for(name: &str) -> Theme {
    match name {
        "dark" => Theme {
            background: "#0d1117",
            title: "#58a6ff",
            text: "#c9d1d9",
            accent: "#f78166",
        },
        _ => Theme {
            background: "#fffefe",
            title: "#2f80ed",
            text: "#434d58",
            accent: "#4c71f2",
        },
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn card_shell(theme: &Theme, title: &str, body: &str, height: u32) -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="420" height="{height}" viewBox="0 0 420 {height}" fill="none" role="img">
  <rect width="419" height="{rect_height}" x="0.5" y="0.5" rx="4.5" fill="{background}" stroke="#e4e2e2"/>
  <text x="25" y="33" font-family="Segoe UI, Ubuntu, sans-serif" font-size="18" font-weight="600" fill="{title_color}">{title}</text>
{body}
</svg>"##,
        rect_height = height - 1,
        background = theme.background,
        title_color = theme.title,
        title = escape(title),
    )
}

fn stat_line(theme: &Theme, index: usize, label: &str, value: &str) -> String {
    let y = 62 + index * 25;
    format!(
        r##"  <text x="25" y="{y}" font-family="Segoe UI, Ubuntu, sans-serif" font-size="14" fill="{text}">{label}:</text>
  <text x="250" y="{y}" font-family="Segoe UI, Ubuntu, sans-serif" font-size="14" font-weight="600" fill="{accent}">{value}</text>"##,
        text = theme.text,
        accent = theme.accent,
        label = escape(label),
        value = escape(value),
    )
}

async fn render_overview(
    stats: &crate::collectors::UserStats,
    username: &str,
    theme: &Theme,
) -> String {
    let mut report = PartialReport::new();
    let name = report
        .or_default("name", stats.name(), username.to_string())
        .await;
    let contributions = report
        .or_default("contributions", stats.total_contributions(), 0)
        .await;
    let stars = report.or_default("stars", stats.stargazers(), 0).await;
    let forks = report.or_default("forks", stats.forks(), 0).await;
    let repos = report
        .or_default("repos", async { Ok(stats.repos().await?.len() as u64) }, 0)
        .await;
    let lines = report
        .or_default("lines", stats.lines_changed(), (0, 0))
        .await;

    let rows = [
        ("Total Contributions", contributions.to_string()),
        ("Total Stars", stars.to_string()),
        ("Total Forks", forks.to_string()),
        ("Repositories", repos.to_string()),
        ("Lines Changed", format!("+{} / -{}", lines.0, lines.1)),
    ];
    let body: String = rows
        .iter()
        .enumerate()
        .map(|(i, (label, value))| stat_line(theme, i, label, value))
        .collect::<Vec<_>>()
        .join("\n");
    card_shell(theme, &format!("{name}'s GitHub Stats"), &body, 200)
}

async fn render_streak(
    stats: &crate::collectors::UserStats,
    username: &str,
    theme: &Theme,
) -> String {
    let mut report = PartialReport::new();
    let current = report
        .or_default("current streak", stats.current_streak(), Default::default())
        .await;
    let longest = report
        .or_default("longest streak", stats.longest_streak(), Default::default())
        .await;
    let total = report
        .or_default("total contributions", stats.total_contributions(), 0)
        .await;

    let rows = [
        (
            "Current Streak",
            format!("{} days ({})", current.length, current.range_label()),
        ),
        (
            "Longest Streak",
            format!("{} days ({})", longest.length, longest.range_label()),
        ),
        ("Total Contributions", total.to_string()),
    ];
    let body: String = rows
        .iter()
        .enumerate()
        .map(|(i, (label, value))| stat_line(theme, i, label, value))
        .collect::<Vec<_>>()
        .join("\n");
    card_shell(theme, &format!("{username}'s Contribution Streak"), &body, 150)
}

async fn render_languages(
    stats: &crate::collectors::UserStats,
    username: &str,
    theme: &Theme,
) -> String {
    let languages = stats.languages().await.unwrap_or_default();
    let mut ranked: Vec<_> = languages.iter().collect();
    ranked.sort_by(|a, b| b.1.size.cmp(&a.1.size));

    let mut body = String::new();
    for (i, &(name, lang)) in ranked.iter().take(5).enumerate() {
        let y = 55 + i * 28;
        let width = (lang.prop * 2.6).max(2.0);
        let color = lang.color.as_deref().unwrap_or(theme.accent);
        body.push_str(&format!(
            r##"  <text x="25" y="{text_y}" font-family="Segoe UI, Ubuntu, sans-serif" font-size="13" fill="{text}">{name} {prop:.1}%</text>
  <rect x="25" y="{y}" width="{width:.0}" height="8" rx="4" fill="{color}"/>
"##,
            text_y = y - 4,
            y = y + 2,
            text = theme.text,
            name = escape(name),
            prop = lang.prop,
        ));
    }
    if ranked.is_empty() {
        body = format!(
            r##"  <text x="25" y="60" font-family="Segoe UI, Ubuntu, sans-serif" font-size="14" fill="{}">No language data</text>"##,
            theme.text
        );
    }
    card_shell(theme, &format!("{username}'s Languages"), &body, 200)
}

pub async fn card(
    State(ctx): State<Arc<Context>>,
    Path((username, card_type)): Path<(String, String)>,
    Query(q): Query<CardQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validated_username(&username)?;
    verify_api_key(&ctx.config, &headers)?;
    if !["overview", "streak", "languages"].contains(&card_type.as_str()) {
        return Err(ApiError::Validation(format!(
            "unknown card type {card_type}"
        )));
    }
    let theme_name = q.theme.unwrap_or_else(|| "default".to_string());
    let theme = theme_for(&theme_name);

    let signature = format!("card:{card_type}:{theme_name}");
    let svg = match crate::handlers::cached_lookup(&ctx, &username, &signature, q.no_cache).await {
        Some(cached) => {
            let svg = cached.as_str().unwrap_or_default().to_string();
            return Ok(svg_response(svg, true));
        }
        None => {
            let resolved = crate::scope::resolve_token(
                &ctx.transport,
                &ctx.config,
                &username,
                user_token_header(&headers),
            )
            .await?;
            let stats = build_stats(&ctx, &username, &resolved)?;
            match card_type.as_str() {
                "overview" => render_overview(&stats, &username, &theme).await,
                "streak" => render_streak(&stats, &username, &theme).await,
                _ => render_languages(&stats, &username, &theme).await,
            }
        }
    };

    ctx.cache
        .set(&username, &signature, serde_json::Value::String(svg.clone()))
        .await;
    Ok(svg_response(svg, false))
}

fn svg_response(svg: String, hit: bool) -> Response {
    let mut resp = svg.into_response();
    resp.headers_mut().insert(
        CONTENT_TYPE,
        axum::http::HeaderValue::from_static("image/svg+xml; charset=utf-8"),
    );
    resp.headers_mut().insert(
        "x-cache",
        axum::http::HeaderValue::from_static(if hit { "HIT" } else { "MISS" }),
    );
    resp
}
