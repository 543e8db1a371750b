use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::price::truncate_to_hour;
use crate::models::Price;

use super::UtilityProvider;

/// How long one feed response is reused before refetching.
const FEED_CACHE_TTL: StdDuration = StdDuration::from_secs(5 * 60);

/// Minutes of subinterval coverage required before an hour counts as
/// confirmed.
const CONFIRMED_COVERAGE_MINUTES: i64 = 55;

/// Minutes each feed entry represents.
const ENTRY_MINUTES: i64 = 5;

/// ComEd residential real-time pricing.
///
/// The 5-minute feed publishes prices in cents/kWh with millisecond UTC
/// timestamps; hours are interpreted in the utility's zone. Day-ahead
/// futures come from PJM when an API key is configured.
pub struct ComEd {
    client: reqwest::Client,
    api_url: String,
    pjm_api_key: String,
    pjm_api_url: String,
    cache: Mutex<Option<FeedCache>>,
}

struct FeedCache {
    fetched_at: Instant,
    entries: Vec<FeedEntry>,
}

/// One parsed 5-minute feed entry.
#[derive(Debug, Clone, Copy)]
struct FeedEntry {
    ts: DateTime<Utc>,
    dollars_per_kwh: f64,
}

#[derive(Debug, Deserialize)]
struct ComedPriceEntry {
    #[serde(rename = "millisUTC")]
    millis_utc: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct PjmLmpRow {
    datetime_beginning_ept: String,
    total_lmp_da: f64,
}

// ComEd hours are interpreted in America/Chicago; Central time is a
// whole-hour offset, so hour boundaries coincide with UTC hour boundaries
// and truncation can happen in UTC.
const PJM_ZONE: Tz = New_York;

impl ComEd {
    pub fn new(api_url: String, pjm_api_key: String, pjm_api_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("ess-autopilot")
            .timeout(StdDuration::from_secs(10))
            .build()
            .map_err(|e| AppError::upstream("building price client", e))?;
        Ok(Self {
            client,
            api_url,
            pjm_api_key,
            pjm_api_url,
            cache: Mutex::new(None),
        })
    }

    /// Fetch the 5-minute feed, reusing a recent response.
    async fn fetch_prices(&self) -> Result<Vec<FeedEntry>> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < FEED_CACHE_TTL {
                return Ok(cached.entries.clone());
            }
        }

        debug!(url = %self.api_url, "fetching price feed");
        let raw: Vec<ComedPriceEntry> = self
            .client
            .get(&self.api_url)
            .send()
            .await
            .map_err(|e| AppError::upstream("fetching price feed", e))?
            .json()
            .await
            .map_err(|e| AppError::upstream("decoding price feed", e))?;

        let mut entries = Vec::with_capacity(raw.len());
        for entry in raw {
            let millis: i64 = entry
                .millis_utc
                .parse()
                .map_err(|e| AppError::upstream("parsing feed timestamp", e))?;
            let cents: f64 = entry
                .price
                .parse()
                .map_err(|e| AppError::upstream("parsing feed price", e))?;
            let ts = Utc
                .timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| AppError::Upstream("feed timestamp out of range".into()))?;
            entries.push(FeedEntry {
                ts,
                dollars_per_kwh: cents / 100.0,
            });
        }
        entries.sort_by_key(|e| e.ts);

        *cache = Some(FeedCache {
            fetched_at: Instant::now(),
            entries: entries.clone(),
        });
        Ok(entries)
    }

    fn hourly_average(entries: &[FeedEntry], hour_start: DateTime<Utc>) -> Option<(f64, usize)> {
        let hour_end = hour_start + Duration::hours(1);
        // An entry timestamped XX:05 covers (XX:00, XX:05]; the XX+1:00
        // entry belongs to hour XX.
        let in_hour: Vec<f64> = entries
            .iter()
            .filter(|e| e.ts > hour_start && e.ts <= hour_end)
            .map(|e| e.dollars_per_kwh)
            .collect();
        if in_hour.is_empty() {
            return None;
        }
        let avg = in_hour.iter().sum::<f64>() / in_hour.len() as f64;
        Some((avg, in_hour.len()))
    }
}

#[async_trait::async_trait]
impl UtilityProvider for ComEd {
    async fn get_current_price(&self) -> Result<Price> {
        let entries = self.fetch_prices().await?;
        let latest = entries
            .last()
            .ok_or_else(|| AppError::Upstream("price feed returned no entries".into()))?;

        // The latest entry's hour; entries right on the hour boundary close
        // the previous hour.
        let hour_start = truncate_to_hour(latest.ts - Duration::minutes(1));
        let (avg, _) = Self::hourly_average(&entries, hour_start)
            .ok_or_else(|| AppError::Upstream("no prices in the current hour".into()))?;

        Ok(Price::new(hour_start, hour_start + Duration::hours(1), avg))
    }

    async fn last_confirmed_price(&self) -> Result<Price> {
        let entries = self.fetch_prices().await?;
        let now = Utc::now();

        let mut hours: Vec<DateTime<Utc>> = entries
            .iter()
            .map(|e| truncate_to_hour(e.ts - Duration::minutes(1)))
            .collect();
        hours.sort();
        hours.dedup();

        for hour_start in hours.into_iter().rev() {
            let hour_end = hour_start + Duration::hours(1);
            if hour_end > now {
                continue;
            }
            if let Some((avg, count)) = Self::hourly_average(&entries, hour_start) {
                if count as i64 * ENTRY_MINUTES >= CONFIRMED_COVERAGE_MINUTES {
                    return Ok(Price::new(hour_start, hour_end, avg));
                }
            }
        }

        Err(AppError::Upstream(
            "no fully-covered elapsed hour in the price feed".into(),
        ))
    }

    async fn get_future_prices(&self) -> Result<Vec<Price>> {
        // Day-ahead prices require a PJM subscription; without one the
        // controller simply sees no future prices.
        if self.pjm_api_key.is_empty() {
            return Ok(Vec::new());
        }

        debug!(url = %self.pjm_api_url, "fetching day-ahead prices");
        let rows: Vec<PjmLmpRow> = self
            .client
            .get(&self.pjm_api_url)
            .header("Ocp-Apim-Subscription-Key", &self.pjm_api_key)
            .query(&[
                ("rowCount", "48"),
                ("startRow", "1"),
                ("fields", "datetime_beginning_ept,total_lmp_da"),
            ])
            .send()
            .await
            .map_err(|e| AppError::upstream("fetching day-ahead prices", e))?
            .json()
            .await
            .map_err(|e| AppError::upstream("decoding day-ahead prices", e))?;

        let mut prices = Vec::with_capacity(rows.len());
        for row in rows {
            let naive = NaiveDateTime::parse_from_str(&row.datetime_beginning_ept, "%Y-%m-%dT%H:%M:%S")
                .map_err(|e| AppError::upstream("parsing day-ahead timestamp", e))?;
            let ts_start = PJM_ZONE
                .from_local_datetime(&naive)
                .single()
                .ok_or_else(|| AppError::Upstream("ambiguous day-ahead timestamp".into()))?
                .with_timezone(&Utc);
            prices.push(Price::new(
                ts_start,
                ts_start + Duration::hours(1),
                row.total_lmp_da / 1000.0,
            ));
        }
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn comed(server_url: String) -> ComEd {
        ComEd::new(server_url, String::new(), String::new()).unwrap()
    }

    #[tokio::test]
    async fn averages_subintervals_into_the_hour() {
        let mut server = mockito::Server::new_async().await;
        // Two entries in the same hour: 2.0 and 3.0 cents, averaging to
        // 2.5 cents = $0.025. 1706227200000 is 2024-01-26 00:00:00 UTC.
        let mock = server
            .mock("GET", "/")
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"millisUTC":"1706227500000","price":"2.0"},
                    {"millisUTC":"1706227800000","price":"3.0"}
                ]"#,
            )
            .create_async()
            .await;

        let c = comed(server.url());
        let price = c.get_current_price().await.unwrap();

        assert!((price.dollars_per_kwh - 0.025).abs() < 1e-9);
        let expected = Utc.timestamp_millis_opt(1706227200000).unwrap();
        assert_eq!(price.ts_start, Some(expected));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn last_confirmed_price_needs_full_coverage() {
        let now = Utc::now();
        let prev_hour_start = truncate_to_hour(now - Duration::hours(1));
        let curr_hour_start = truncate_to_hour(now);

        // Full coverage of the previous hour (12 entries at 2.0 cents) and
        // a single entry in the current, unconfirmed hour at 4.0 cents.
        let mut entries = Vec::new();
        for i in 1..=12 {
            let t = prev_hour_start + Duration::minutes(i * 5);
            entries.push(format!(
                r#"{{"millisUTC":"{}","price":"2.0"}}"#,
                t.timestamp_millis()
            ));
        }
        let t = curr_hour_start + Duration::minutes(5);
        entries.push(format!(
            r#"{{"millisUTC":"{}","price":"4.0"}}"#,
            t.timestamp_millis()
        ));
        let body = format!("[{}]", entries.join(","));

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_body(body)
            .create_async()
            .await;

        let c = comed(server.url());
        let price = c.last_confirmed_price().await.unwrap();

        assert!((price.dollars_per_kwh - 0.02).abs() < 1e-9);
        assert_eq!(price.ts_start, Some(prev_hour_start));
        assert!(price.ts_end.unwrap() <= Utc::now());
    }

    #[tokio::test]
    async fn feed_responses_are_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .with_body(r#"[{"millisUTC":"1706227500000","price":"2.0"}]"#)
            .expect(1)
            .create_async()
            .await;

        let c = comed(server.url());
        c.fetch_prices().await.unwrap();
        c.fetch_prices().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn future_prices_empty_without_pjm_key() {
        let c = comed("http://127.0.0.1:1".to_string());
        let prices = c.get_future_prices().await.unwrap();
        assert!(prices.is_empty());
    }

    #[tokio::test]
    async fn future_prices_come_from_pjm() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/da_hrl_lmps")
            .match_header("Ocp-Apim-Subscription-Key", "test-key")
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"[
                    {"datetime_beginning_ept": "2026-02-02T00:00:00", "total_lmp_da": 34.999970},
                    {"datetime_beginning_ept": "2026-02-02T01:00:00", "total_lmp_da": 19.775851}
                ]"#,
            )
            .create_async()
            .await;

        let c = ComEd::new(
            "http://127.0.0.1:1".to_string(),
            "test-key".to_string(),
            format!("{}/api/v1/da_hrl_lmps", server.url()),
        )
        .unwrap();

        let prices = c.get_future_prices().await.unwrap();
        assert_eq!(prices.len(), 2);
        assert!((prices[0].dollars_per_kwh - 0.03499997).abs() < 1e-7);

        // Midnight eastern time on 2026-02-02 (EST, UTC-5).
        let expected = Utc.with_ymd_and_hms(2026, 2, 2, 5, 0, 0).unwrap();
        assert_eq!(prices[0].ts_start, Some(expected));
        assert_eq!(prices[0].ts_end, Some(expected + Duration::hours(1)));
        assert_eq!(prices[0].ts_start.unwrap().minute(), 0);
        mock.assert_async().await;
    }
}
