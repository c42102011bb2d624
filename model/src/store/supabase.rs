//! A [`Store`](super::Store) backed by Supabase's PostgREST API.
//!
//! The `users`, `favorites` and `promo_codes` tables are provisioned outside this process.

use super::{Favorite, PromoCode, Stats, Store, User, UserField, UserSummary};
use anyhow::Error;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration as StdDuration;
use surf::{http::Method, Url};

const USER_SUMMARY_COLUMNS: &str = "user_id,username,created_at,is_premium,premium_ends_at";
const FAVORITE_LIST_COLUMNS: &str =
    "recipe_id,user_id,dish_name,recipe_text,products_snapshot,created_at";

/// A Supabase client.
pub struct Supabase {
    client: surf::Client,
    key: String,
}

impl Supabase {
    /// Connect to the Supabase project at `url`.
    pub fn new(url: &Url, key: &str) -> Result<Self, Error> {
        Ok(Self {
            client: surf::Config::default()
                .set_base_url(url.join("rest/v1/")?)
                .set_timeout(Some(StdDuration::from_secs(30)))
                .try_into()
                .map_err(Error::msg)?,
            key: key.into(),
        })
    }

    fn request(&self, method: Method, table: &'static str) -> Request {
        let builder = self
            .client
            .request(method, table)
            .header("apikey", self.key.as_str())
            .header("Authorization", format!("Bearer {}", self.key));
        Request {
            builder,
            table,
            params: Default::default(),
        }
    }

    fn get(&self, table: &'static str) -> Request {
        self.request(Method::Get, table)
    }
}

/// A PostgREST request under construction.
struct Request {
    builder: surf::RequestBuilder,
    table: &'static str,
    params: BTreeMap<String, String>,
}

impl Request {
    fn param(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(param.into(), value.into());
        self
    }

    /// Filter rows where `column` equals `value`.
    fn eq(self, column: &str, value: impl Display) -> Self {
        self.param(column, format!("eq.{value}"))
    }

    fn select(self, columns: &str) -> Self {
        self.param("select", columns)
    }

    fn limit(self, limit: usize) -> Self {
        self.param("limit", limit.to_string())
    }

    fn newest_first(self) -> Self {
        self.param("order", "created_at.desc")
    }

    fn prefer(mut self, preference: &str) -> Self {
        self.builder = self.builder.header("Prefer", preference);
        self
    }

    fn body(mut self, body: &impl Serialize) -> Result<Self, Error> {
        self.builder = self.builder.body_json(body).map_err(Error::msg)?;
        Ok(self)
    }

    async fn send(self) -> Result<surf::Response, Error> {
        tracing::debug!(table = self.table, params = ?self.params, "Supabase request");
        let mut res = self
            .builder
            .query(&self.params)
            .map_err(Error::msg)?
            .await
            .map_err(Error::msg)?;
        if !res.status().is_success() {
            let body = res.body_string().await.unwrap_or_default();
            return Err(Error::msg(format!(
                "Supabase error on {} ({}): {body}",
                self.table,
                res.status()
            )));
        }
        Ok(res)
    }

    async fn execute(self) -> Result<(), Error> {
        self.send().await?;
        Ok(())
    }

    async fn fetch<T: DeserializeOwned>(self) -> Result<Vec<T>, Error> {
        self.send().await?.body_json().await.map_err(Error::msg)
    }

    async fn fetch_one<T: DeserializeOwned>(self) -> Result<Option<T>, Error> {
        Ok(self.limit(1).fetch().await?.into_iter().next())
    }

    /// Count the matching rows, using the total from the `Content-Range` header.
    async fn count(self) -> Result<u64, Error> {
        let res = self
            .select("user_id")
            .limit(1)
            .prefer("count=exact")
            .send()
            .await?;
        let range = res
            .header("Content-Range")
            .ok_or_else(|| Error::msg("count response has no Content-Range"))?;
        parse_content_range(range.as_str())
    }
}

fn parse_content_range(range: &str) -> Result<u64, Error> {
    let total = range
        .rsplit('/')
        .next()
        .ok_or_else(|| Error::msg(format!("malformed Content-Range {range}")))?;
    total
        .parse()
        .map_err(|_| Error::msg(format!("malformed Content-Range {range}")))
}

/// Format a timestamp for a filter, without a `+` which would not survive query encoding.
fn timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The `or` filter for a user search.
fn user_search_filter(query: &str) -> String {
    let pattern = query.replace([',', '(', ')'], " ");
    match query.parse::<i64>() {
        Ok(id) => format!("(user_id.eq.{id},username.ilike.*{pattern}*)"),
        Err(_) => format!("(username.ilike.*{pattern}*)"),
    }
}

#[async_trait]
impl Store for Supabase {
    async fn user(&self, user_id: i64) -> Result<User, Error> {
        if let Some(user) = self
            .get("users")
            .select("*")
            .eq("user_id", user_id)
            .fetch_one::<User>()
            .await?
        {
            return Ok(user);
        }

        let user = User::new(user_id);
        let created = self
            .request(Method::Post, "users")
            .prefer("return=representation,resolution=ignore-duplicates")
            .param("on_conflict", "user_id")
            .body(&user)?
            .fetch::<User>()
            .await?;
        match created.into_iter().next() {
            Some(user) => {
                tracing::info!(user_id, "new user");
                Ok(user)
            }
            // Someone else created the user first.
            None => self
                .get("users")
                .select("*")
                .eq("user_id", user_id)
                .fetch_one::<User>()
                .await?
                .ok_or_else(|| Error::msg(format!("user {user_id} vanished"))),
        }
    }

    async fn update_user(&self, user_id: i64, fields: &[UserField]) -> Result<(), Error> {
        let mut row = Map::new();
        for field in fields {
            field.columns(&mut row)?;
        }
        row.insert("updated_at".into(), serde_json::to_value(Utc::now())?);
        self.request(Method::Patch, "users")
            .eq("user_id", user_id)
            .body(&row)?
            .execute()
            .await
    }

    async fn insert_favorite(&self, favorite: &Favorite) -> Result<(), Error> {
        self.request(Method::Post, "favorites")
            .body(favorite)?
            .execute()
            .await
    }

    async fn favorites(&self, user_id: i64, limit: usize) -> Result<Vec<Favorite>, Error> {
        self.get("favorites")
            .select(FAVORITE_LIST_COLUMNS)
            .eq("user_id", user_id)
            .newest_first()
            .limit(limit)
            .fetch()
            .await
    }

    async fn favorite(&self, user_id: i64, recipe_id: &str) -> Result<Option<Favorite>, Error> {
        self.get("favorites")
            .select("*")
            .eq("user_id", user_id)
            .eq("recipe_id", recipe_id)
            .fetch_one()
            .await
    }

    async fn delete_favorite(&self, user_id: i64, recipe_id: &str) -> Result<bool, Error> {
        let deleted = self
            .request(Method::Delete, "favorites")
            .eq("user_id", user_id)
            .eq("recipe_id", recipe_id)
            .prefer("return=representation")
            .select("recipe_id")
            .fetch::<Value>()
            .await?;
        Ok(!deleted.is_empty())
    }

    async fn favorite_exists(&self, user_id: i64, dish_name: &str) -> Result<bool, Error> {
        let found = self
            .get("favorites")
            .select("recipe_id")
            .eq("user_id", user_id)
            .eq("dish_name", dish_name)
            .fetch_one::<Value>()
            .await?;
        Ok(found.is_some())
    }

    async fn count_favorites(&self, user_id: i64) -> Result<usize, Error> {
        let count = self
            .get("favorites")
            .eq("user_id", user_id)
            .count()
            .await?;
        Ok(count as usize)
    }

    async fn promo_code(&self, code: &str) -> Result<Option<PromoCode>, Error> {
        self.get("promo_codes")
            .select("*")
            .eq("code", code)
            .fetch_one()
            .await
    }

    async fn insert_promo_code(&self, promo: &PromoCode) -> Result<(), Error> {
        self.request(Method::Post, "promo_codes")
            .body(promo)?
            .execute()
            .await
    }

    async fn record_promo_use(
        &self,
        promo: &PromoCode,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let updated = self
            .request(Method::Patch, "promo_codes")
            .eq("code", &promo.code)
            .eq("usages_count", promo.usages_count)
            .prefer("return=representation")
            .select("code")
            .body(&json!({
                "usages_count": promo.usages_count + 1,
                "activated_by": user_id,
                "activated_at": at,
            }))?
            .fetch::<Value>()
            .await?;
        Ok(!updated.is_empty())
    }

    async fn users(&self, limit: usize) -> Result<Vec<UserSummary>, Error> {
        self.get("users")
            .select(USER_SUMMARY_COLUMNS)
            .newest_first()
            .limit(limit)
            .fetch()
            .await
    }

    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<UserSummary>, Error> {
        self.get("users")
            .select(USER_SUMMARY_COLUMNS)
            .param("or", user_search_filter(query))
            .newest_first()
            .limit(limit)
            .fetch()
            .await
    }

    async fn stats(&self) -> Result<Stats, Error> {
        let now = Utc::now();
        let week_ago = timestamp(now - Duration::days(7));
        Ok(Stats {
            total_users: self.get("users").count().await?,
            premium_users: self.get("users").eq("is_premium", true).count().await?,
            new_users_7d: self
                .get("users")
                .param("created_at", format!("gte.{week_ago}"))
                .count()
                .await?,
            total_recipes: self.get("favorites").count().await?,
            updated_at: now,
        })
    }

    async fn clear_sessions_before(&self, cutoff: DateTime<Utc>) -> Result<(), Error> {
        self.request(Method::Patch, "users")
            .param("updated_at", format!("lt.{}", timestamp(cutoff)))
            .body(&json!({ "session_json": {} }))?
            .execute()
            .await
    }
}
