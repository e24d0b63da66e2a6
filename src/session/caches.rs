//! Quick caches
//!
//! Subreddits, multireddits and feed infos are cached inside the user
//! record with their fetch time. A cache younger than [`CACHE_MAX_AGE_MS`]
//! is served without asking the API.

use crate::error::SessionResult;
use crate::remote::RemoteSource;
use crate::session::types::{CachesPatch, MultiReddit, SessionPatch, StoredData};
use crate::session::user::UserSession;
use chrono::Utc;
use serde_json::Value;

pub const CACHE_MAX_AGE_MS: i64 = 5 * 60 * 1000;

/// Subscribed subreddits, fetched page by page when the cache is stale.
///
/// Returns prefixed names (`r/rust`) sorted case-insensitively. Guests get
/// whatever is cached.
pub async fn load_subreddits(
    session: &UserSession,
    remote: &dyn RemoteSource,
) -> SessionResult<Vec<String>> {
    let now = Utc::now().timestamp_millis();

    let cached = session.read(|d| d.caches.subs.clone());
    if let Some(subs) = &cached {
        if subs.is_fresh(CACHE_MAX_AGE_MS, now) {
            return Ok(subreddit_names(&subs.data));
        }
    }

    let token = match (session.is_logged_in(), session.access_token()) {
        (true, Some(token)) => token,
        _ => return Ok(cached.map(|s| subreddit_names(&s.data)).unwrap_or_default()),
    };

    let mut subs = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let page = remote.my_subreddits(&token, after.as_deref()).await?;
        subs.extend(
            page.children
                .into_iter()
                .map(|thing| thing.get("data").cloned().unwrap_or(thing)),
        );

        match page.after {
            Some(next) if after.as_deref() != Some(next.as_str()) => after = Some(next),
            _ => break,
        }
    }

    subs.sort_by_key(|sub| display_name(sub).to_lowercase());
    let names = subreddit_names(&subs);

    tracing::debug!(user = %session.name(), count = subs.len(), "Subreddits fetched");
    store_caches(
        session,
        CachesPatch::new().subs(Some(StoredData::new(subs, now))),
    )
    .await;

    Ok(names)
}

/// The user's multireddits, fetched when the cache is stale
pub async fn load_multis(
    session: &UserSession,
    remote: &dyn RemoteSource,
) -> SessionResult<Vec<MultiReddit>> {
    let now = Utc::now().timestamp_millis();

    let cached = session.read(|d| d.caches.multis.clone());
    if let Some(multis) = &cached {
        if multis.is_fresh(CACHE_MAX_AGE_MS, now) {
            return Ok(multis.data.clone());
        }
    }

    let token = match (session.is_logged_in(), session.access_token()) {
        (true, Some(token)) => token,
        _ => return Ok(cached.map(|m| m.data).unwrap_or_default()),
    };

    let multis: Vec<MultiReddit> = remote
        .my_multis(&token)
        .await?
        .iter()
        .filter_map(multi_from_thing)
        .collect();

    store_caches(
        session,
        CachesPatch::new().multis(Some(StoredData::new(multis.clone(), now))),
    )
    .await;

    Ok(multis)
}

/// Cache the info of a feed page, stamped now
pub async fn store_feed_info(session: &UserSession, url: &str, info: Value) {
    let stored = StoredData::new(info, Utc::now().timestamp_millis());
    store_caches(session, CachesPatch::new().feed_info(url, stored)).await;
}

pub async fn remove_feed_info(session: &UserSession, url: &str) {
    store_caches(session, CachesPatch::new().remove_feed_info(url)).await;
}

/// `display_name_prefixed` of each subreddit
pub fn subreddit_names(subs: &[Value]) -> Vec<String> {
    subs.iter()
        .filter_map(|sub| {
            sub.get("display_name_prefixed")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    let name = display_name(sub);
                    (!name.is_empty()).then(|| format!("r/{}", name))
                })
        })
        .collect()
}

/// Case-insensitive lookup by bare (`rust`) or prefixed (`r/rust`) name
pub fn contains_subreddit(subs: &[Value], name: &str) -> bool {
    let wanted = name.trim_start_matches("r/").to_lowercase();
    subs.iter()
        .any(|sub| display_name(sub).to_lowercase() == wanted)
}

fn display_name(sub: &Value) -> &str {
    sub.get("display_name").and_then(Value::as_str).unwrap_or("")
}

fn multi_from_thing(thing: &Value) -> Option<MultiReddit> {
    let data = thing.get("data").unwrap_or(thing);
    Some(MultiReddit {
        display_name: data.get("display_name")?.as_str()?.to_string(),
        path: data.get("path")?.as_str()?.to_string(),
    })
}

async fn store_caches(session: &UserSession, patch: CachesPatch) {
    if let Err(e) = session.update(SessionPatch::new().caches(patch)).await {
        tracing::debug!(error = %e, "Cache kept in memory only");
    }
}
