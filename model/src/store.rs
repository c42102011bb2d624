//! Persistent state: users and their conversations, saved recipes and promo codes.
//!
//! Storage backends implement the object-safe [`Store`] trait. Operations which combine several
//! storage calls, such as [`activate_promo`], are written once on top of it.

use crate::recipe::Dish;
use crate::text::{char_len, prefix};
use anyhow::Error;
use async_std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use surf::Url;
use uuid::Uuid;

mod memory;
mod supabase;

pub use memory::MemoryStore;
pub use supabase::Supabase;

/// The number of messages kept in a conversation history.
pub const MAX_HISTORY_MESSAGES: usize = 8;

/// Conversations of users inactive for this many days are cleared.
pub const SESSION_RETENTION_DAYS: i64 = 180;

const MAX_DISH_NAME: usize = 500;
const MAX_RECIPE_TEXT: usize = 10000;
const MAX_PRODUCTS_SNAPSHOT: usize = 2000;
const MAX_IMAGE_BASE64: usize = 500000;

/// A storage backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Get a user, creating a fresh record if they have never been seen before.
    async fn user(&self, user_id: i64) -> Result<User, Error>;

    /// Update some fields of a user, stamping the update time.
    async fn update_user(&self, user_id: i64, fields: &[UserField]) -> Result<(), Error>;

    async fn insert_favorite(&self, favorite: &Favorite) -> Result<(), Error>;

    /// A user's most recent favorites, newest first.
    ///
    /// Images are not loaded; use [`favorite`](Self::favorite) to get a complete record.
    async fn favorites(&self, user_id: i64, limit: usize) -> Result<Vec<Favorite>, Error>;

    async fn favorite(&self, user_id: i64, recipe_id: &str) -> Result<Option<Favorite>, Error>;

    /// Delete a favorite, returning whether it existed.
    async fn delete_favorite(&self, user_id: i64, recipe_id: &str) -> Result<bool, Error>;

    /// Whether the user already saved a recipe with this exact dish name.
    async fn favorite_exists(&self, user_id: i64, dish_name: &str) -> Result<bool, Error>;

    async fn count_favorites(&self, user_id: i64) -> Result<usize, Error>;

    async fn promo_code(&self, code: &str) -> Result<Option<PromoCode>, Error>;

    async fn insert_promo_code(&self, promo: &PromoCode) -> Result<(), Error>;

    /// Count one more use of `promo` by `user_id`.
    ///
    /// The use is only recorded if the stored code still has the usage count of `promo`. Returns
    /// whether it was recorded.
    async fn record_promo_use(
        &self,
        promo: &PromoCode,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, Error>;

    /// The most recently created users.
    async fn users(&self, limit: usize) -> Result<Vec<UserSummary>, Error>;

    /// Users whose ID equals `query` or whose username contains it.
    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<UserSummary>, Error>;

    async fn stats(&self) -> Result<Stats, Error>;

    /// Reset the conversation of every user not updated since `cutoff`.
    async fn clear_sessions_before(&self, cutoff: DateTime<Utc>) -> Result<(), Error>;
}

/// A shared handle to the storage backend.
pub type Connection = Arc<dyn Store>;

/// Storage options.
#[derive(Clone, Debug, Default, Args)]
pub struct Options {
    /// Supabase project URL.
    #[clap(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<Url>,

    /// Supabase service key.
    #[clap(long, env = "SUPABASE_KEY")]
    pub supabase_key: Option<String>,
}

impl Options {
    /// Connect to Supabase, or to a fresh in-memory store if Supabase is not configured.
    pub fn connect(&self) -> Result<Connection, Error> {
        match (&self.supabase_url, &self.supabase_key) {
            (Some(url), Some(key)) => {
                let store = Supabase::new(url, key)?;
                tracing::info!(%url, "using Supabase storage");
                Ok(Arc::new(store))
            }
            _ => {
                tracing::warn!(
                    "SUPABASE_URL and SUPABASE_KEY are not set; data will be lost on restart"
                );
                Ok(Arc::new(MemoryStore::default()))
            }
        }
    }
}

/// Where a user is in the conversation.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, EnumString, Deserialize, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    EnteringProducts,
    SelectingCategory,
    SelectingDish,
    RecipeSent,
    GeneratingImage,
}

/// A Telegram user known to the bot.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct User {
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    /// Comma-separated products the user has entered so far.
    #[serde(default)]
    pub products: Option<String>,
    #[serde(default, deserialize_with = "deserialize_state")]
    pub state: Option<UserState>,
    #[serde(rename = "session_json", default, deserialize_with = "deserialize_session")]
    pub session: Session,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub premium_ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_banned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(user_id: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            username: None,
            products: None,
            state: None,
            session: Session::default(),
            is_premium: false,
            premium_ends_at: None,
            is_banned: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The user's products, if they have entered any.
    pub fn products(&self) -> Option<&str> {
        self.products.as_deref().filter(|products| !products.is_empty())
    }

    /// Whether the user currently has an unexpired premium subscription.
    pub fn has_premium(&self, now: DateTime<Utc>) -> bool {
        self.is_premium && self.premium_ends_at.map_or(false, |end| end > now)
    }

    fn apply(&mut self, field: &UserField) {
        match field {
            UserField::Username(username) => self.username = username.clone(),
            UserField::Products(products) => self.products = products.clone(),
            UserField::State(state) => self.state = *state,
            UserField::Session(session) => self.session = session.clone(),
            UserField::Premium { ends_at } => {
                self.is_premium = true;
                self.premium_ends_at = Some(*ends_at);
            }
            UserField::Banned(banned) => self.is_banned = *banned,
        }
    }
}

/// Treat states written by older versions of the bot as no state at all.
fn deserialize_state<'a, D: Deserializer<'a>>(d: D) -> Result<Option<UserState>, D::Error> {
    let state = Option::<String>::deserialize(d)?;
    Ok(state.and_then(|state| state.parse().ok()))
}

fn deserialize_session<'a, D: Deserializer<'a>>(d: D) -> Result<Session, D::Error> {
    Ok(Option::<Session>::deserialize(d)?.unwrap_or_default())
}

/// A change to one field of a [`User`].
#[derive(Clone, Debug, PartialEq)]
pub enum UserField {
    Username(Option<String>),
    Products(Option<String>),
    State(Option<UserState>),
    Session(Session),
    /// Grant premium until the given time.
    Premium { ends_at: DateTime<Utc> },
    Banned(bool),
}

impl UserField {
    /// The columns this change writes, in the shape of a `users` row.
    fn columns(&self, row: &mut Map<String, Value>) -> Result<(), Error> {
        match self {
            Self::Username(username) => {
                row.insert("username".into(), serde_json::to_value(username)?);
            }
            Self::Products(products) => {
                row.insert("products".into(), serde_json::to_value(products)?);
            }
            Self::State(state) => {
                row.insert("state".into(), serde_json::to_value(state)?);
            }
            Self::Session(session) => {
                row.insert("session_json".into(), serde_json::to_value(session)?);
            }
            Self::Premium { ends_at } => {
                row.insert("is_premium".into(), Value::Bool(true));
                row.insert("premium_ends_at".into(), serde_json::to_value(ends_at)?);
            }
            Self::Banned(banned) => {
                row.insert("is_banned".into(), Value::Bool(*banned));
            }
        }
        Ok(())
    }
}

/// Per-user conversation data, stored with the user as `session_json`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Session {
    /// Category keys offered for the current products.
    pub categories: Vec<String>,
    /// Dishes offered for the selected category.
    pub generated_dishes: Vec<Dish>,
    /// The last recipe sent, which may be saved or illustrated.
    pub temp_recipe: Option<TempRecipe>,
    pub history: Vec<HistoryMessage>,
}

impl Session {
    /// Record a message, keeping only the most recent [`MAX_HISTORY_MESSAGES`].
    pub fn push_message(&mut self, role: Role, text: impl Into<String>) {
        self.history.push(HistoryMessage {
            role,
            text: text.into(),
            timestamp: Some(Utc::now()),
        });
        if self.history.len() > MAX_HISTORY_MESSAGES {
            let excess = self.history.len() - MAX_HISTORY_MESSAGES;
            self.history.drain(..excess);
        }
    }

    pub fn last_bot_message(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|msg| msg.role == Role::Bot)
            .map(|msg| msg.text.as_str())
    }

    /// The `index`th dish offered to the user.
    pub fn dish(&self, index: usize) -> Option<&Dish> {
        self.generated_dishes.get(index)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A recipe which has been sent to the user but not necessarily saved.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct TempRecipe {
    pub name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub products: String,
    /// Description used to illustrate the dish.
    #[serde(default)]
    pub visual: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A recipe saved by a user.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Favorite {
    pub recipe_id: String,
    pub user_id: i64,
    pub dish_name: String,
    #[serde(default)]
    pub recipe_text: String,
    #[serde(default)]
    pub products_snapshot: String,
    #[serde(default)]
    pub image_base64: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A code which grants premium access for some number of days.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PromoCode {
    pub code: String,
    #[serde(default = "default_days")]
    pub days_value: i64,
    #[serde(default = "default_usage_limit")]
    pub usage_limit: i64,
    #[serde(default)]
    pub usages_count: i64,
    #[serde(default)]
    pub activated_by: Option<i64>,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn default_days() -> i64 {
    7
}

fn default_usage_limit() -> i64 {
    1
}

/// The outcome of trying to activate a promo code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromoActivation {
    NotFound,
    LimitReached,
    AlreadyUsed,
    Activated {
        days: i64,
        expires_at: DateTime<Utc>,
    },
}

/// A user as shown in admin listings.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct UserSummary {
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub premium_ends_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id,
            username: user.username.clone(),
            created_at: user.created_at,
            is_premium: user.is_premium,
            premium_ends_at: user.premium_ends_at,
        }
    }
}

/// Usage statistics.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Stats {
    pub total_users: u64,
    pub premium_users: u64,
    /// Users created in the last 7 days.
    pub new_users_7d: u64,
    pub total_recipes: u64,
    pub updated_at: DateTime<Utc>,
}

/// Save a recipe to a user's favorites, returning its new ID.
///
/// Overlong fields are truncated. An image too large to store is dropped, and the recipe is saved
/// without it.
pub async fn save_favorite(
    store: &dyn Store,
    user_id: i64,
    dish_name: &str,
    recipe_text: &str,
    products: &str,
    image_base64: Option<String>,
) -> Result<String, Error> {
    let image_base64 = match image_base64 {
        Some(image) if char_len(&image) > MAX_IMAGE_BASE64 => {
            tracing::warn!(dish_name, "image too large to save, dropping it");
            None
        }
        image => image,
    };
    let favorite = Favorite {
        recipe_id: Uuid::new_v4().to_string(),
        user_id,
        dish_name: prefix(dish_name, MAX_DISH_NAME).into(),
        recipe_text: prefix(recipe_text, MAX_RECIPE_TEXT).into(),
        products_snapshot: prefix(products, MAX_PRODUCTS_SNAPSHOT).into(),
        image_base64,
        created_at: Utc::now(),
    };
    store.insert_favorite(&favorite).await?;
    tracing::info!(user_id, dish_name, recipe_id = %favorite.recipe_id, "saved favorite");
    Ok(favorite.recipe_id)
}

/// Activate a promo code for a user.
///
/// Premium time is added to any unexpired subscription the user already has.
pub async fn activate_promo(
    store: &dyn Store,
    user_id: i64,
    code: &str,
) -> Result<PromoActivation, Error> {
    let now = Utc::now();
    let promo = loop {
        let Some(promo) = store.promo_code(&code.to_uppercase()).await? else {
            return Ok(PromoActivation::NotFound);
        };
        if promo.usages_count >= promo.usage_limit {
            return Ok(PromoActivation::LimitReached);
        }
        if promo.activated_by == Some(user_id) {
            return Ok(PromoActivation::AlreadyUsed);
        }
        if store.record_promo_use(&promo, user_id, now).await? {
            break promo;
        }
        // Another activation got in first; re-read the code and check again.
    };

    let days = promo.days_value;
    let user = store.user(user_id).await?;
    let start = match user.premium_ends_at {
        Some(end) if end > now => end,
        _ => now,
    };
    let expires_at = start + Duration::days(days);

    store
        .update_user(user_id, &[UserField::Premium { ends_at: expires_at }])
        .await?;
    tracing::info!(user_id, code = %promo.code, days, "promo code activated");
    Ok(PromoActivation::Activated { days, expires_at })
}

/// Create a promo code worth `days` days of premium, usable `limit` times.
pub async fn create_promo_code(
    store: &dyn Store,
    code: &str,
    days: i64,
    limit: i64,
) -> Result<PromoCode, Error> {
    let promo = PromoCode {
        code: code.to_uppercase(),
        days_value: days,
        usage_limit: limit,
        usages_count: 0,
        activated_by: None,
        activated_at: None,
        created_at: Utc::now(),
    };
    store.insert_promo_code(&promo).await?;
    tracing::info!(code = %promo.code, days, limit, "created promo code");
    Ok(promo)
}

/// Clear the conversations of users inactive for more than `days` days.
pub async fn cleanup_old_data(store: &dyn Store, days: i64) -> Result<(), Error> {
    store
        .clear_sessions_before(Utc::now() - Duration::days(days))
        .await?;
    tracing::info!(days, "cleared stale sessions");
    Ok(())
}
