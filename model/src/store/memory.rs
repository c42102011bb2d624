//! An in-memory [`Store`](super::Store).
//!
//! Used in tests, and in production when no database is configured.

use super::{Favorite, PromoCode, Stats, Store, User, UserField, UserSummary};
use anyhow::Error;
use async_std::sync::{Arc, RwLock};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<i64, User>,
    favorites: Vec<Favorite>,
    promo_codes: HashMap<String, PromoCode>,
}

/// A store that keeps everything in process memory.
///
/// Clones share the same data.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<Tables>>);

impl MemoryStore {
    /// Add or replace a user record.
    pub async fn put_user(&self, user: User) {
        self.0.write().await.users.insert(user.user_id, user);
    }
}

fn newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn user(&self, user_id: i64) -> Result<User, Error> {
        let mut db = self.0.write().await;
        Ok(db
            .users
            .entry(user_id)
            .or_insert_with(|| {
                tracing::info!(user_id, "new user");
                User::new(user_id)
            })
            .clone())
    }

    async fn update_user(&self, user_id: i64, fields: &[UserField]) -> Result<(), Error> {
        let mut db = self.0.write().await;
        let user = db
            .users
            .entry(user_id)
            .or_insert_with(|| User::new(user_id));
        for field in fields {
            user.apply(field);
        }
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_favorite(&self, favorite: &Favorite) -> Result<(), Error> {
        self.0.write().await.favorites.push(favorite.clone());
        Ok(())
    }

    async fn favorites(&self, user_id: i64, limit: usize) -> Result<Vec<Favorite>, Error> {
        let db = self.0.read().await;
        let mut favorites = db
            .favorites
            .iter()
            .filter(|favorite| favorite.user_id == user_id)
            .map(|favorite| Favorite {
                image_base64: None,
                ..favorite.clone()
            })
            .collect::<Vec<_>>();
        newest_first(&mut favorites, |favorite| favorite.created_at);
        favorites.truncate(limit);
        Ok(favorites)
    }

    async fn favorite(&self, user_id: i64, recipe_id: &str) -> Result<Option<Favorite>, Error> {
        let db = self.0.read().await;
        Ok(db
            .favorites
            .iter()
            .find(|favorite| favorite.user_id == user_id && favorite.recipe_id == recipe_id)
            .cloned())
    }

    async fn delete_favorite(&self, user_id: i64, recipe_id: &str) -> Result<bool, Error> {
        let mut db = self.0.write().await;
        let before = db.favorites.len();
        db.favorites
            .retain(|favorite| !(favorite.user_id == user_id && favorite.recipe_id == recipe_id));
        Ok(db.favorites.len() < before)
    }

    async fn favorite_exists(&self, user_id: i64, dish_name: &str) -> Result<bool, Error> {
        let db = self.0.read().await;
        Ok(db
            .favorites
            .iter()
            .any(|favorite| favorite.user_id == user_id && favorite.dish_name == dish_name))
    }

    async fn count_favorites(&self, user_id: i64) -> Result<usize, Error> {
        let db = self.0.read().await;
        Ok(db
            .favorites
            .iter()
            .filter(|favorite| favorite.user_id == user_id)
            .count())
    }

    async fn promo_code(&self, code: &str) -> Result<Option<PromoCode>, Error> {
        Ok(self.0.read().await.promo_codes.get(code).cloned())
    }

    async fn insert_promo_code(&self, promo: &PromoCode) -> Result<(), Error> {
        let mut db = self.0.write().await;
        if db.promo_codes.contains_key(&promo.code) {
            return Err(Error::msg(format!("promo code {} already exists", promo.code)));
        }
        db.promo_codes.insert(promo.code.clone(), promo.clone());
        Ok(())
    }

    async fn record_promo_use(
        &self,
        promo: &PromoCode,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut db = self.0.write().await;
        let stored = db
            .promo_codes
            .get_mut(&promo.code)
            .ok_or_else(|| Error::msg(format!("no promo code {}", promo.code)))?;
        if stored.usages_count != promo.usages_count {
            return Ok(false);
        }
        stored.usages_count += 1;
        stored.activated_by = Some(user_id);
        stored.activated_at = Some(at);
        Ok(true)
    }

    async fn users(&self, limit: usize) -> Result<Vec<UserSummary>, Error> {
        let db = self.0.read().await;
        let mut users = db.users.values().map(UserSummary::from).collect::<Vec<_>>();
        newest_first(&mut users, |user| user.created_at);
        users.truncate(limit);
        Ok(users)
    }

    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<UserSummary>, Error> {
        let id = query.parse::<i64>().ok();
        let query = query.to_lowercase();
        let db = self.0.read().await;
        let mut users = db
            .users
            .values()
            .filter(|user| {
                Some(user.user_id) == id
                    || user
                        .username
                        .as_ref()
                        .map_or(false, |name| name.to_lowercase().contains(&query))
            })
            .map(UserSummary::from)
            .collect::<Vec<_>>();
        newest_first(&mut users, |user| user.created_at);
        users.truncate(limit);
        Ok(users)
    }

    async fn stats(&self) -> Result<Stats, Error> {
        let db = self.0.read().await;
        let now = Utc::now();
        let week_ago = now - Duration::days(7);
        Ok(Stats {
            total_users: db.users.len() as u64,
            premium_users: db.users.values().filter(|user| user.is_premium).count() as u64,
            new_users_7d: db
                .users
                .values()
                .filter(|user| user.created_at >= week_ago)
                .count() as u64,
            total_recipes: db.favorites.len() as u64,
            updated_at: now,
        })
    }

    async fn clear_sessions_before(&self, cutoff: DateTime<Utc>) -> Result<(), Error> {
        let mut db = self.0.write().await;
        for user in db.users.values_mut() {
            if user.updated_at < cutoff {
                user.session.clear();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::{save_favorite, Role, UserState};

    #[async_std::test]
    async fn test_user_get_or_create() {
        let store = MemoryStore::default();
        let user = store.user(5).await.unwrap();
        assert_eq!(user.user_id, 5);
        assert_eq!(user.state, None);

        store
            .update_user(
                5,
                &[
                    UserField::Products(Some("рис".into())),
                    UserField::State(Some(UserState::EnteringProducts)),
                ],
            )
            .await
            .unwrap();
        let updated = store.user(5).await.unwrap();
        assert_eq!(updated.products(), Some("рис"));
        assert_eq!(updated.state, Some(UserState::EnteringProducts));
        assert!(updated.updated_at >= user.updated_at);
    }

    #[async_std::test]
    async fn test_favorites() {
        let store = MemoryStore::default();
        let first = save_favorite(&store, 1, "Борщ", "Варить", "свекла", Some("aW1n".into()))
            .await
            .unwrap();
        let second = save_favorite(&store, 1, "Омлет", "Жарить", "яйца", None)
            .await
            .unwrap();
        save_favorite(&store, 2, "Чай", "Заварить", "чай", None)
            .await
            .unwrap();

        assert_eq!(store.count_favorites(1).await.unwrap(), 2);
        assert!(store.favorite_exists(1, "Борщ").await.unwrap());
        assert!(!store.favorite_exists(2, "Борщ").await.unwrap());

        let list = store.favorites(1, 20).await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|favorite| favorite.image_base64.is_none()));
        assert_eq!(store.favorites(1, 1).await.unwrap().len(), 1);

        let full = store.favorite(1, &first).await.unwrap().unwrap();
        assert_eq!(full.image_base64.as_deref(), Some("aW1n"));
        assert!(store.favorite(2, &first).await.unwrap().is_none());

        assert!(store.delete_favorite(1, &second).await.unwrap());
        assert!(!store.delete_favorite(1, &second).await.unwrap());
        assert_eq!(store.count_favorites(1).await.unwrap(), 1);
    }

    #[async_std::test]
    async fn test_admin_queries() {
        let store = MemoryStore::default();
        let mut alice = User::new(100);
        alice.username = Some("Alice".into());
        alice.is_premium = true;
        store.put_user(alice).await;
        let mut old = User::new(200);
        old.created_at = Utc::now() - Duration::days(30);
        store.put_user(old).await;

        let users = store.users(10).await.unwrap();
        assert_eq!(
            users.iter().map(|user| user.user_id).collect::<Vec<_>>(),
            [100, 200]
        );
        assert_eq!(store.search_users("ali", 10).await.unwrap()[0].user_id, 100);
        assert_eq!(store.search_users("200", 10).await.unwrap()[0].user_id, 200);
        assert!(store.search_users("bob", 10).await.unwrap().is_empty());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.premium_users, 1);
        assert_eq!(stats.new_users_7d, 1);
        assert_eq!(stats.total_recipes, 0);
    }

    #[async_std::test]
    async fn test_clear_sessions() {
        let store = MemoryStore::default();
        let mut stale = User::new(1);
        stale.session.push_message(Role::Bot, "рецепт");
        stale.updated_at = Utc::now() - Duration::days(200);
        let mut fresh = stale.clone();
        fresh.user_id = 2;
        fresh.updated_at = Utc::now();
        store.put_user(stale).await;
        store.put_user(fresh).await;

        crate::store::cleanup_old_data(&store, 180).await.unwrap();
        assert!(store.user(1).await.unwrap().session.history.is_empty());
        assert_eq!(store.user(2).await.unwrap().session.history.len(), 1);
    }

    #[async_std::test]
    async fn test_promo_use_from_stale_read() {
        let store = MemoryStore::default();
        crate::store::create_promo_code(&store, "once", 7, 1)
            .await
            .unwrap();
        let promo = store.promo_code("ONCE").await.unwrap().unwrap();

        let now = Utc::now();
        assert!(store.record_promo_use(&promo, 1, now).await.unwrap());
        assert!(!store.record_promo_use(&promo, 2, now).await.unwrap());

        let stored = store.promo_code("ONCE").await.unwrap().unwrap();
        assert_eq!(stored.usages_count, 1);
        assert_eq!(stored.activated_by, Some(1));
    }
}
