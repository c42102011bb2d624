//! The conversation: commands, free text, voice and inline-keyboard callbacks.
//!
//! A user moves from entering products, to choosing a category, to choosing a dish, to reading a
//! recipe, which they can illustrate and save. Everything the bot needs to remember between
//! updates lives in the user's [`store::User`] record, so updates can be handled concurrently.

use crate::chef::Chef;
use crate::images::{DishImage, ImageService};
use crate::intent::{Intent, IntentDetector};
use crate::keyboards::{self, Callback};
use crate::llm::ChatModel;
use crate::recipe::{self, RecipeStats};
use crate::store::{self, Connection, Role, Session, TempRecipe, UserField, UserState};
use crate::telegram::{
    self, BotCommand, CallbackQuery, InlineKeyboardMarkup, Message, Photo, Telegram, Update, Voice,
};
use crate::text::{char_len, prefix, split_into_chunks};
use crate::validate::{self, InputKind};
use anyhow::Error;
use async_std::task::sleep;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use futures::future::join_all;
use std::time::{Duration, Instant};

mod messages;

/// The longest product list a user may accumulate, in characters.
pub const MAX_PRODUCTS_LENGTH: usize = 2000;

/// Longer texts are sent as several messages.
pub const MAX_RECIPE_LENGTH: usize = 4000;

/// Telegram's limit on photo captions.
const MAX_CAPTION_LENGTH: usize = 1024;

const FAVORITES_SHOWN: usize = 20;
const FAVORITES_SEARCHED: usize = 500;
const ADMIN_USERS_SHOWN: usize = 10;

const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const DIRECT_RECIPE_PREFIX: &str = "дай рецепт";
const THANKS: [&str; 5] = ["спасибо", "спс", "благодарю", "thanks", "thank you"];

/// The AI chef bot.
pub struct Bot<T, M> {
    telegram: T,
    chef: Chef<M>,
    store: Connection,
    images: ImageService,
    intents: IntentDetector,
    admin_id: i64,
}

impl<T: Telegram, M: ChatModel> Bot<T, M> {
    pub fn new(
        telegram: T,
        chef: Chef<M>,
        store: Connection,
        images: ImageService,
        admin_id: i64,
    ) -> Self {
        Self {
            telegram,
            chef,
            store,
            images,
            intents: IntentDetector::new(),
            admin_id,
        }
    }

    pub fn telegram(&self) -> &T {
        &self.telegram
    }

    pub fn chef(&self) -> &Chef<M> {
        &self.chef
    }

    pub fn store(&self) -> &Connection {
        &self.store
    }

    pub fn images(&self) -> &ImageService {
        &self.images
    }

    /// Poll for updates forever.
    ///
    /// Each batch of updates is handled concurrently. Polling failures are retried after a pause;
    /// the only error returned is failure to remove a webhook at startup.
    pub async fn run(&self) -> Result<(), Error> {
        self.telegram.delete_webhook(true).await?;
        tracing::info!(admin_id = self.admin_id, "polling for updates");

        let mut offset = 0;
        loop {
            let updates = match self.telegram.get_updates(offset, POLL_TIMEOUT_SECS).await {
                Ok(updates) => updates,
                Err(err) => {
                    tracing::error!(%err, "polling failed");
                    sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };
            if let Some(last) = updates.iter().map(|update| update.update_id).max() {
                offset = last + 1;
            }
            join_all(updates.iter().map(|update| self.handle_update(update))).await;
        }
    }

    /// Handle one update. Failures are reported to the user and logged, never returned.
    pub async fn handle_update(&self, update: &Update) {
        let Some(sender) = update.sender() else {
            tracing::debug!(update_id = update.update_id, "ignoring update without a sender");
            return;
        };
        let start = Instant::now();

        match self.store.user(sender.id).await {
            Ok(user) if user.is_banned => {
                tracing::info!(user_id = sender.id, "ignoring banned user");
                return;
            }
            Ok(user) if sender.username.is_some() && user.username != sender.username => {
                let field = UserField::Username(sender.username.clone());
                if let Err(err) = self.store.update_user(sender.id, &[field]).await {
                    tracing::error!(user_id = sender.id, "cannot update username: {err:#}");
                }
            }
            Ok(_) => {}
            Err(err) => tracing::error!(user_id = sender.id, "cannot load user: {err:#}"),
        }

        let result = if let Some(query) = &update.callback_query {
            tracing::info!(user_id = sender.id, data = ?query.data, "callback");
            self.handle_callback(query).await
        } else if let Some(message) = &update.message {
            tracing::info!(
                user_id = sender.id,
                username = ?sender.username,
                text = ?message.text,
                voice = message.voice.is_some(),
                "message"
            );
            self.handle_message(message, sender.id).await
        } else {
            Ok(())
        };

        match result {
            Ok(()) => {}
            Err(err) if is_benign(&err) => tracing::debug!("ignoring Telegram error: {err}"),
            Err(err) => {
                tracing::error!(user_id = sender.id, "error handling update: {err:#}");
                self.apologize(update).await;
            }
        }
        tracing::info!(user_id = sender.id, elapsed = ?start.elapsed(), "handled update");
    }

    async fn apologize(&self, update: &Update) {
        let result = if let Some(query) = &update.callback_query {
            self.alert(query, messages::CALLBACK_FAILED).await
        } else if let Some(message) = &update.message {
            self.send(message.chat.id, messages::MESSAGE_FAILED, None)
                .await
                .map(|_| ())
        } else {
            Ok(())
        };
        if let Err(err) = result {
            tracing::warn!(%err, "cannot report error to user");
        }
    }

    fn is_admin(&self, user_id: i64) -> bool {
        self.admin_id != 0 && user_id == self.admin_id
    }

    async fn send(
        &self,
        chat_id: i64,
        html: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, telegram::Error> {
        self.telegram.send_message(chat_id, html, markup).await
    }

    /// Send a text of any length, splitting it into several messages if necessary.
    ///
    /// The keyboard is attached to the last message.
    async fn send_long(
        &self,
        chat_id: i64,
        html: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), telegram::Error> {
        let chunks = split_into_chunks(html, MAX_RECIPE_LENGTH);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last { markup } else { None };
            self.send(chat_id, chunk, markup).await?;
        }
        Ok(())
    }

    /// Delete a status message or a voice message, logging any failure.
    async fn delete(&self, chat_id: i64, message_id: i64) {
        match self.telegram.delete_message(chat_id, message_id).await {
            Ok(()) => {}
            Err(err) if err.is_benign() => {}
            Err(err) => tracing::warn!(chat_id, message_id, %err, "cannot delete message"),
        }
    }

    async fn answer(&self, query: &CallbackQuery, text: Option<&str>) -> Result<(), Error> {
        self.telegram
            .answer_callback_query(&query.id, text, false)
            .await?;
        Ok(())
    }

    async fn alert(&self, query: &CallbackQuery, text: &str) -> Result<(), telegram::Error> {
        self.telegram
            .answer_callback_query(&query.id, Some(text), true)
            .await
    }

    async fn handle_message(&self, message: &Message, user_id: i64) -> Result<(), Error> {
        let chat_id = message.chat.id;
        if let Some(voice) = &message.voice {
            return self.handle_voice(message, voice, user_id).await;
        }
        let Some(text) = message.text.as_deref().map(str::trim) else {
            return Ok(());
        };

        if let Some((command, args)) = parse_command(text) {
            return match command {
                "start" => self.start(chat_id, user_id).await,
                "author" => {
                    self.send(chat_id, messages::AUTHOR, None).await?;
                    Ok(())
                }
                "my_recipes" => self.my_recipes(chat_id, user_id, args).await,
                "stats" => self.stats(chat_id, user_id).await,
                "admin" => self.admin(chat_id, user_id).await,
                "promo" => self.promo(chat_id, user_id, args).await,
                _ => {
                    tracing::debug!(command, "ignoring unknown command");
                    Ok(())
                }
            };
        }

        let lower = text.to_lowercase();
        if let Some(dish) = lower.strip_prefix(DIRECT_RECIPE_PREFIX) {
            return self.direct_recipe(chat_id, user_id, dish.trim()).await;
        }
        self.handle_text(chat_id, user_id, text).await
    }

    async fn handle_text(&self, chat_id: i64, user_id: i64, text: &str) -> Result<(), Error> {
        if is_thanks(text) {
            return self.add_products(chat_id, user_id, text).await;
        }
        if let Err(invalid) = validate::user_input(text, InputKind::General) {
            tracing::info!(user_id, %invalid, "rejected input");
            self.send(chat_id, &messages::invalid_input(invalid), None)
                .await?;
            return Ok(());
        }

        let intent = self.intents.detect(text);
        tracing::debug!(user_id, ?intent, confidence = intent.confidence(), "detected intent");
        match intent {
            Intent::RecipeRequest { dish } => self.direct_recipe(chat_id, user_id, &dish).await,
            Intent::Greeting => {
                self.send(chat_id, messages::GREETING_HINT, None).await?;
                Ok(())
            }
            Intent::ProductsList { products, .. } => {
                self.add_products(chat_id, user_id, &products).await
            }
            Intent::Unknown => self.add_products(chat_id, user_id, text).await,
        }
    }

    async fn handle_voice(&self, message: &Message, voice: &Voice, user_id: i64) -> Result<(), Error> {
        let chat_id = message.chat.id;
        let status = self.send(chat_id, messages::LISTENING, None).await?;

        let audio = match self.telegram.download_file(&voice.file_id).await {
            Ok(audio) => audio,
            Err(err) => {
                tracing::error!(user_id, file_id = %voice.file_id, %err, "cannot download voice message");
                self.delete(chat_id, status.message_id).await;
                self.send(chat_id, messages::VOICE_FAILED, None).await?;
                return Ok(());
            }
        };
        let file_name = format!("voice_{user_id}_{}.ogg", voice.file_id);
        let text = self.chef.transcribe(audio, &file_name).await;

        self.delete(chat_id, status.message_id).await;
        self.delete(chat_id, message.message_id).await;

        let text = text.trim();
        if text.is_empty() {
            self.send(chat_id, messages::VOICE_NOT_RECOGNIZED, None)
                .await?;
            return Ok(());
        }
        tracing::info!(user_id, text, "recognized voice message");
        self.add_products(chat_id, user_id, text).await
    }

    async fn start(&self, chat_id: i64, user_id: i64) -> Result<(), Error> {
        let mut commands = vec![
            BotCommand::new("start", "🔄 Рестарт / Начать заново"),
            BotCommand::new("my_recipes", "📂 Сохраненные рецепты"),
            BotCommand::new("author", "👨‍💻 Связь с автором"),
        ];
        if self.is_admin(user_id) {
            commands.push(BotCommand::new("admin", "🛠 Панель администратора"));
            commands.push(BotCommand::new("stats", "📊 Статистика"));
        }
        if let Err(err) = self.telegram.set_my_commands(&commands, chat_id).await {
            tracing::error!(user_id, %err, "cannot set command menu");
        }

        self.store
            .update_user(
                user_id,
                &[
                    UserField::State(None),
                    UserField::Products(None),
                    UserField::Session(Session::default()),
                ],
            )
            .await?;
        self.send(chat_id, messages::WELCOME, None).await?;
        Ok(())
    }

    async fn my_recipes(&self, chat_id: i64, user_id: i64, query: &str) -> Result<(), Error> {
        let (header, favorites, total) = if query.is_empty() {
            let favorites = self.store.favorites(user_id, FAVORITES_SHOWN).await?;
            if favorites.is_empty() {
                self.send(chat_id, messages::NO_FAVORITES, None).await?;
                return Ok(());
            }
            let total = self.store.count_favorites(user_id).await?;
            (messages::FAVORITES_HEADER.to_string(), favorites, total)
        } else {
            let all = self.store.favorites(user_id, FAVORITES_SEARCHED).await?;
            let found = recipe::search(&all, query);
            if found.is_empty() {
                self.send(chat_id, &messages::nothing_found(query), None)
                    .await?;
                return Ok(());
            }
            let total = found.len();
            let favorites = found
                .into_iter()
                .take(FAVORITES_SHOWN)
                .cloned()
                .collect::<Vec<_>>();
            (messages::search_header(query), favorites, total)
        };

        self.send(
            chat_id,
            &messages::favorites(&header, &favorites, total),
            Some(&keyboards::favorites(&favorites)),
        )
        .await?;
        Ok(())
    }

    async fn stats(&self, chat_id: i64, user_id: i64) -> Result<(), Error> {
        if !self.is_admin(user_id) {
            let favorites = self.store.favorites(user_id, FAVORITES_SEARCHED).await?;
            let stats = RecipeStats::calculate(&favorites);
            self.send(chat_id, &messages::personal_stats(&stats), None)
                .await?;
            return Ok(());
        }

        let text = match self.store.stats().await {
            Ok(users) => messages::system_stats(&users, &self.images.stats().await),
            Err(err) => {
                tracing::error!("cannot load statistics: {err:#}");
                messages::stats_failed(err)
            }
        };
        self.send(chat_id, &text, None).await?;
        Ok(())
    }

    async fn admin(&self, chat_id: i64, user_id: i64) -> Result<(), Error> {
        if !self.is_admin(user_id) {
            tracing::warn!(user_id, "non-admin tried to open the admin panel");
            return Ok(());
        }
        let users = self.store.users(ADMIN_USERS_SHOWN).await?;
        self.send(chat_id, &messages::admin_panel(&users, Utc::now()), None)
            .await?;
        Ok(())
    }

    async fn promo(&self, chat_id: i64, user_id: i64, code: &str) -> Result<(), Error> {
        if code.is_empty() {
            self.send(chat_id, messages::PROMO_MISSING, None).await?;
            return Ok(());
        }
        let activation = store::activate_promo(&*self.store, user_id, code).await?;
        tracing::info!(user_id, code, ?activation, "promo code");
        self.send(chat_id, &messages::promo(&activation), None)
            .await?;
        Ok(())
    }

    /// Send a recipe for a dish the user named, regardless of their products.
    async fn direct_recipe(&self, chat_id: i64, user_id: i64, dish: &str) -> Result<(), Error> {
        if char_len(dish) < 3 {
            self.send(chat_id, messages::DISH_NAME_MISSING, None)
                .await?;
            return Ok(());
        }

        let wait = self
            .send(chat_id, &messages::searching_recipe(dish), None)
            .await?;
        let recipe = self.chef.generate_freestyle_recipe(dish).await;
        self.delete(chat_id, wait.message_id).await;
        if recipe.trim().is_empty() {
            self.send(chat_id, messages::FREESTYLE_FAILED, None).await?;
            return Ok(());
        }

        self.remember_recipe(user_id, dish, &recipe, "").await?;
        self.send_long(
            chat_id,
            &recipe,
            Some(&keyboards::recipe(false, None, Some(dish))),
        )
        .await?;
        Ok(())
    }

    /// Make `recipe` the one the user can save or illustrate.
    async fn remember_recipe(
        &self,
        user_id: i64,
        dish: &str,
        recipe: &str,
        products: &str,
    ) -> Result<(), Error> {
        let mut session = self.store.user(user_id).await?.session;
        session.temp_recipe = Some(TempRecipe {
            name: dish.into(),
            text: recipe.into(),
            products: products.into(),
            visual: dish.into(),
            image_base64: None,
        });
        session.push_message(Role::User, dish);
        session.push_message(Role::Bot, recipe);
        self.store
            .update_user(
                user_id,
                &[
                    UserField::Session(session),
                    UserField::State(Some(UserState::RecipeSent)),
                ],
            )
            .await
    }

    /// Add products to the user's list, or acknowledge thanks for a recipe.
    async fn add_products(&self, chat_id: i64, user_id: i64, text: &str) -> Result<(), Error> {
        let user = self.store.user(user_id).await?;

        if is_thanks(text) {
            if user.state == Some(UserState::RecipeSent) {
                self.send(chat_id, messages::YOU_ARE_WELCOME, None).await?;
                self.store
                    .update_user(user_id, &[UserField::State(None)])
                    .await?;
            }
            return Ok(());
        }

        let reply = match user.products() {
            None => {
                if !self.chef.validate_ingredients(text).await {
                    self.send(chat_id, &messages::not_products(text), None)
                        .await?;
                    return Ok(());
                }
                self.store
                    .update_user(
                        user_id,
                        &[
                            UserField::Products(Some(text.into())),
                            UserField::State(Some(UserState::EnteringProducts)),
                        ],
                    )
                    .await?;
                messages::accepted(text)
            }
            Some(current) => {
                let products = format!("{current}, {text}");
                if char_len(&products) > MAX_PRODUCTS_LENGTH {
                    self.send(
                        chat_id,
                        &messages::too_many_products(current, MAX_PRODUCTS_LENGTH),
                        None,
                    )
                    .await?;
                    return Ok(());
                }
                self.store
                    .update_user(user_id, &[UserField::Products(Some(products.clone()))])
                    .await?;
                messages::added(text, &products)
            }
        };
        self.send(chat_id, &reply, Some(&keyboards::confirmation()))
            .await?;
        Ok(())
    }

    async fn choose_category(&self, chat_id: i64, user_id: i64) -> Result<(), Error> {
        let user = self.store.user(user_id).await?;
        let Some(products) = user.products() else {
            self.send(chat_id, messages::NO_PRODUCTS, None).await?;
            return Ok(());
        };

        let wait = self.send(chat_id, messages::ANALYZING, None).await?;
        let categories = self.chef.analyze_categories(products).await;
        self.delete(chat_id, wait.message_id).await;
        if categories.is_empty() {
            self.send(chat_id, messages::NO_CATEGORIES, None).await?;
            return Ok(());
        }

        let mut session = user.session.clone();
        session.categories = categories.clone();
        self.store
            .update_user(
                user_id,
                &[
                    UserField::Session(session),
                    UserField::State(Some(UserState::SelectingCategory)),
                ],
            )
            .await?;

        if let [category] = categories.as_slice() {
            return self.show_dishes(chat_id, user_id, products, category).await;
        }
        self.send(
            chat_id,
            &messages::choose_category(products),
            Some(&keyboards::categories(&categories)),
        )
        .await?;
        Ok(())
    }

    async fn show_dishes(
        &self,
        chat_id: i64,
        user_id: i64,
        products: &str,
        category: &str,
    ) -> Result<(), Error> {
        let wait = self
            .send(chat_id, &messages::picking_dishes(category), None)
            .await?;
        let dishes = self.chef.generate_dishes(products, category).await;
        self.delete(chat_id, wait.message_id).await;
        if dishes.is_empty() {
            self.send(chat_id, &messages::no_dishes(category), None)
                .await?;
            return Ok(());
        }

        let mut session = self.store.user(user_id).await?.session;
        session.generated_dishes = dishes.clone();
        self.store
            .update_user(
                user_id,
                &[
                    UserField::Session(session),
                    UserField::State(Some(UserState::SelectingDish)),
                ],
            )
            .await?;
        self.send(
            chat_id,
            &messages::menu(category, &dishes),
            Some(&keyboards::dishes(&dishes)),
        )
        .await?;
        Ok(())
    }

    async fn send_recipe(&self, chat_id: i64, user_id: i64, dish: &str) -> Result<(), Error> {
        let wait = self
            .send(chat_id, &messages::writing_recipe(dish), None)
            .await?;
        let user = self.store.user(user_id).await?;
        let products = user.products().unwrap_or_default();
        let recipe = self.chef.generate_recipe(dish, products).await;
        self.delete(chat_id, wait.message_id).await;
        if recipe.trim().is_empty() {
            self.send(chat_id, messages::RECIPE_FAILED, None).await?;
            return Ok(());
        }

        self.remember_recipe(user_id, dish, &recipe, products)
            .await?;
        self.send_long(
            chat_id,
            &recipe,
            Some(&keyboards::recipe(true, None, Some(dish))),
        )
        .await?;
        Ok(())
    }

    async fn handle_callback(&self, query: &CallbackQuery) -> Result<(), Error> {
        let user_id = query.from.id;
        let data = query.data.as_deref().unwrap_or_default();
        let Some(message) = &query.message else {
            tracing::warn!(user_id, data, "callback without a message");
            return self.answer(query, None).await;
        };
        let chat_id = message.chat.id;

        let callback = match data.parse::<Callback>() {
            Ok(callback) => callback,
            Err(err) => {
                tracing::warn!(user_id, %err, "unknown callback");
                return self.answer(query, Some(messages::UNKNOWN_COMMAND)).await;
            }
        };

        match callback {
            Callback::DeleteMessage => {
                self.telegram
                    .delete_message(chat_id, message.message_id)
                    .await?;
                self.answer(query, None).await
            }
            Callback::Restart => {
                self.store
                    .update_user(
                        user_id,
                        &[UserField::State(None), UserField::Products(None)],
                    )
                    .await?;
                self.send(chat_id, messages::SESSION_RESET, None).await?;
                self.answer(query, None).await
            }
            Callback::AddMore => {
                self.send(chat_id, messages::ADD_MORE, None).await?;
                self.answer(query, None).await
            }
            Callback::Cook => {
                self.answer(query, None).await?;
                self.delete(chat_id, message.message_id).await;
                self.choose_category(chat_id, user_id).await
            }
            Callback::Category(category) => {
                let user = self.store.user(user_id).await?;
                let Some(products) = user.products() else {
                    self.alert(query, messages::ENTER_PRODUCTS_FIRST).await?;
                    return Ok(());
                };
                let selected = messages::category_selected(&category);
                self.answer(query, Some(selected.as_str())).await?;
                self.delete(chat_id, message.message_id).await;
                self.show_dishes(chat_id, user_id, products, &category)
                    .await
            }
            Callback::BackToCategories => {
                let user = self.store.user(user_id).await?;
                let categories = &user.session.categories;
                if !categories.is_empty() {
                    self.delete(chat_id, message.message_id).await;
                    self.store
                        .update_user(
                            user_id,
                            &[UserField::State(Some(UserState::SelectingCategory))],
                        )
                        .await?;
                    self.send(
                        chat_id,
                        messages::CHOOSE_CATEGORY_AGAIN,
                        Some(&keyboards::categories(categories)),
                    )
                    .await?;
                }
                self.answer(query, None).await
            }
            Callback::Dish(index) => {
                let user = self.store.user(user_id).await?;
                let Some(dish) = user.session.dish(index) else {
                    self.alert(query, messages::DISH_NOT_FOUND).await?;
                    return Ok(());
                };
                let selected = messages::dish_selected(&dish.name);
                self.answer(query, Some(selected.as_str())).await?;
                self.send_recipe(chat_id, user_id, &dish.name).await
            }
            Callback::GeneratePhoto => self.generate_photo(query, chat_id, user_id).await,
            Callback::SaveRecipe => {
                self.save_recipe(query, chat_id, message.message_id, user_id)
                    .await
            }
            Callback::FavoritesList => {
                self.delete(chat_id, message.message_id).await;
                self.my_recipes(chat_id, user_id, "").await?;
                self.answer(query, None).await
            }
            Callback::ShowFavorite(recipe_id) => {
                self.show_favorite(query, chat_id, user_id, &recipe_id)
                    .await
            }
            Callback::DeleteFavorite(recipe_id) => {
                self.delete_favorite(query, chat_id, message.message_id, user_id, &recipe_id)
                    .await
            }
        }
    }

    async fn generate_photo(
        &self,
        query: &CallbackQuery,
        chat_id: i64,
        user_id: i64,
    ) -> Result<(), Error> {
        let user = self.store.user(user_id).await?;
        let Some(recipe) = user.session.temp_recipe else {
            self.alert(query, messages::NO_RECIPE_FOR_IMAGE).await?;
            return Ok(());
        };
        if !self.images.is_available() {
            self.alert(query, messages::IMAGE_UNAVAILABLE).await?;
            return Ok(());
        }

        self.answer(query, Some(messages::IMAGE_STARTED)).await?;
        let wait = self
            .send(chat_id, &messages::generating_image(&recipe.name), None)
            .await?;
        self.store
            .update_user(
                user_id,
                &[UserField::State(Some(UserState::GeneratingImage))],
            )
            .await?;

        let dish = DishImage::new(&recipe.name)
            .with_recipe(&recipe.text)
            .with_visual(&recipe.visual);
        let image = self.images.generate(&dish).await;
        self.delete(chat_id, wait.message_id).await;

        // Reload the session: the user may have moved on while the image was generated.
        let mut session = self.store.user(user_id).await?.session;
        if let (Some(image), Some(temp)) = (&image, &mut session.temp_recipe) {
            if temp.name == recipe.name {
                temp.image_base64 = Some(STANDARD.encode(image));
            }
        }
        self.store
            .update_user(
                user_id,
                &[
                    UserField::Session(session),
                    UserField::State(Some(UserState::RecipeSent)),
                ],
            )
            .await?;

        let Some(image) = image else {
            self.send(chat_id, messages::IMAGE_FAILED, None).await?;
            return Ok(());
        };
        let photo = Photo {
            bytes: image,
            file_name: format!("{}.jpg", prefix(&recipe.name, 50)),
            caption: Some(messages::image_caption(&recipe.name)),
        };
        if let Err(err) = self.telegram.send_photo(chat_id, photo, None).await {
            tracing::error!(user_id, dish = %recipe.name, %err, "cannot send photo");
            self.send(chat_id, messages::IMAGE_SEND_FAILED, None)
                .await?;
            return Ok(());
        }
        tracing::info!(user_id, dish = %recipe.name, "sent dish photo");
        Ok(())
    }

    async fn save_recipe(
        &self,
        query: &CallbackQuery,
        chat_id: i64,
        message_id: i64,
        user_id: i64,
    ) -> Result<(), Error> {
        let user = self.store.user(user_id).await?;
        let Some(recipe) = user.session.temp_recipe else {
            self.alert(query, messages::NO_RECIPE).await?;
            return Ok(());
        };
        if self.store.favorite_exists(user_id, &recipe.name).await? {
            self.alert(query, messages::ALREADY_SAVED).await?;
            return Ok(());
        }

        let saved = store::save_favorite(
            &*self.store,
            user_id,
            &recipe.name,
            &recipe.text,
            &recipe.products,
            recipe.image_base64.clone(),
        )
        .await;
        if let Err(err) = saved {
            tracing::error!(user_id, dish = %recipe.name, "cannot save favorite: {err:#}");
            self.alert(query, messages::SAVE_FAILED).await?;
            return Ok(());
        }

        self.answer(query, Some(messages::SAVED)).await?;
        self.telegram
            .edit_message_reply_markup(
                chat_id,
                message_id,
                Some(&keyboards::recipe(false, None, Some(recipe.name.as_str()))),
            )
            .await?;
        Ok(())
    }

    async fn show_favorite(
        &self,
        query: &CallbackQuery,
        chat_id: i64,
        user_id: i64,
        recipe_id: &str,
    ) -> Result<(), Error> {
        let Some(favorite) = self.store.favorite(user_id, recipe_id).await? else {
            self.alert(query, messages::FAVORITE_NOT_FOUND).await?;
            return Ok(());
        };
        self.answer(query, None).await?;

        let markup = keyboards::recipe(
            false,
            Some(favorite.recipe_id.as_str()),
            Some(favorite.dish_name.as_str()),
        );
        let header = messages::favorite_header(&favorite.dish_name);
        let text = &favorite.recipe_text;

        let image = favorite.image_base64.as_deref().and_then(|image| {
            STANDARD
                .decode(image)
                .map_err(|err| tracing::error!(recipe_id, %err, "corrupt saved image"))
                .ok()
        });
        if let Some(bytes) = image {
            let (caption, rest) = if char_len(text) > MAX_CAPTION_LENGTH {
                let head = prefix(text, 1000);
                (format!("{header}{head}..."), &text[head.len()..])
            } else {
                (format!("{header}{text}"), "")
            };
            let photo = Photo {
                bytes,
                file_name: "saved_dish.jpg".into(),
                caption: Some(caption),
            };
            match self.telegram.send_photo(chat_id, photo, Some(&markup)).await {
                Ok(_) => {
                    if !rest.is_empty() {
                        self.send_long(chat_id, rest, None).await?;
                    }
                    return Ok(());
                }
                Err(err) => {
                    tracing::error!(recipe_id, %err, "cannot send saved photo, sending text only")
                }
            }
        }

        self.send_long(chat_id, &format!("{header}{text}"), Some(&markup))
            .await?;
        Ok(())
    }

    async fn delete_favorite(
        &self,
        query: &CallbackQuery,
        chat_id: i64,
        message_id: i64,
        user_id: i64,
        recipe_id: &str,
    ) -> Result<(), Error> {
        if !self.store.delete_favorite(user_id, recipe_id).await? {
            self.alert(query, messages::DELETE_FAILED).await?;
            return Ok(());
        }
        self.answer(query, Some(messages::DELETED)).await?;

        let favorites = self.store.favorites(user_id, FAVORITES_SHOWN).await?;
        let (text, markup) = if favorites.is_empty() {
            (messages::FAVORITES_EMPTY_HEADER.to_string(), None)
        } else {
            let total = self.store.count_favorites(user_id).await?;
            (
                messages::favorites(messages::FAVORITES_HEADER, &favorites, total),
                Some(keyboards::favorites(&favorites)),
            )
        };
        // A recipe with a photo cannot be edited into a text message, so replace it instead.
        match self
            .telegram
            .edit_message_text(chat_id, message_id, &text, markup.as_ref())
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_benign() => {}
            Err(err) => {
                tracing::debug!(%err, "cannot edit message, replacing it");
                self.delete(chat_id, message_id).await;
                self.send(chat_id, &text, markup.as_ref()).await?;
            }
        }
        Ok(())
    }
}

/// Split `/command@bot args` into the command name and its arguments.
fn parse_command(text: &str) -> Option<(&str, &str)> {
    let text = text.strip_prefix('/')?;
    let (command, args) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    let command = command.split('@').next().unwrap_or_default();
    Some((command, args.trim()))
}

fn is_thanks(text: &str) -> bool {
    let text = text.to_lowercase();
    THANKS.contains(&text.trim_matches([' ', '.', '!']))
}

fn is_benign(err: &Error) -> bool {
    err.downcast_ref::<telegram::Error>()
        .map_or(false, telegram::Error::is_benign)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::images::{cache, mock::MockProvider, ImageCache, ImageProvider, Provider};
    use crate::llm::mock::MockModel;
    use crate::store::{Favorite, MemoryStore, Store, User};
    use crate::telegram::mock::{Call, MockTelegram};
    use crate::telegram::Chat;
    use async_std::future::timeout;
    use async_std::sync::Arc;
    use chrono::{Duration as TimeDelta, TimeZone};

    const USER: i64 = 42;
    const ADMIN: i64 = 7;
    const CALLBACK_MESSAGE: i64 = 500;

    struct Harness {
        bot: Bot<MockTelegram, MockModel>,
        store: MemoryStore,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            Self::with_images(vec![]).await
        }

        async fn with_images(providers: Vec<Box<dyn ImageProvider>>) -> Self {
            crate::init_logging();
            let dir = tempfile::tempdir().unwrap();
            let opt = crate::images::Options {
                enable_image_cache: false,
                ..Default::default()
            };
            let cache = ImageCache::open(cache::Config {
                dir: dir.path().to_path_buf().into(),
                ..cache::Config::from(&opt)
            })
            .await
            .unwrap();
            let store = MemoryStore::default();
            let bot = Bot::new(
                MockTelegram::new(),
                Chef::new(MockModel::new()),
                Arc::new(store.clone()),
                ImageService::new(&opt, providers, cache),
                ADMIN,
            );
            Self {
                bot,
                store,
                _dir: dir,
            }
        }

        fn telegram(&self) -> &MockTelegram {
            self.bot.telegram()
        }

        fn model(&self) -> &MockModel {
            self.bot.chef().model()
        }

        async fn user(&self) -> User {
            self.store.user(USER).await.unwrap()
        }

        async fn update_user(&self, fields: &[UserField]) {
            self.store.update_user(USER, fields).await.unwrap();
        }

        async fn text(&self, text: &str) {
            self.text_from(USER, text).await
        }

        async fn text_from(&self, user_id: i64, text: &str) {
            self.bot
                .handle_update(&Update {
                    update_id: 1,
                    message: Some(message(user_id, 1, Some(text))),
                    callback_query: None,
                })
                .await
        }

        async fn callback(&self, data: impl ToString) {
            self.bot
                .handle_update(&Update {
                    update_id: 1,
                    message: None,
                    callback_query: Some(CallbackQuery {
                        id: "q1".into(),
                        from: sender(USER),
                        message: Some(message(USER, CALLBACK_MESSAGE, None)),
                        data: Some(data.to_string()),
                    }),
                })
                .await
        }
    }

    fn sender(id: i64) -> telegram::User {
        telegram::User {
            id,
            is_bot: false,
            first_name: "Ann".into(),
            username: Some("ann".into()),
        }
    }

    fn message(user_id: i64, message_id: i64, text: Option<&str>) -> Message {
        Message {
            message_id,
            from: Some(sender(user_id)),
            chat: Chat { id: user_id },
            date: 0,
            text: text.map(String::from),
            caption: None,
            voice: None,
        }
    }

    fn sent(text: impl Into<String>, markup: Option<InlineKeyboardMarkup>) -> Call {
        Call::SendMessage {
            chat_id: USER,
            text: text.into(),
            markup,
        }
    }

    fn deleted(message_id: i64) -> Call {
        Call::DeleteMessage {
            chat_id: USER,
            message_id,
        }
    }

    fn answered(text: Option<&str>, show_alert: bool) -> Call {
        Call::AnswerCallbackQuery {
            query_id: "q1".into(),
            text: text.map(String::from),
            show_alert,
        }
    }

    fn favorite(id: &str, name: &str, minutes_ago: i64) -> Favorite {
        Favorite {
            recipe_id: id.into(),
            user_id: USER,
            dish_name: name.into(),
            recipe_text: format!("Рецепт: {name}"),
            products_snapshot: "рис".into(),
            image_base64: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
                - TimeDelta::minutes(minutes_ago),
        }
    }

    fn temp_recipe(name: &str) -> TempRecipe {
        TempRecipe {
            name: name.into(),
            text: format!("{name}\n\nГотовить 40 минут"),
            products: "рис, морковь".into(),
            visual: name.into(),
            image_base64: None,
        }
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/start"), Some(("start", "")));
        assert_eq!(
            parse_command("/my_recipes@chef_bot  плов "),
            Some(("my_recipes", "плов"))
        );
        assert_eq!(parse_command("/promo CHEF"), Some(("promo", "CHEF")));
        assert_eq!(parse_command("курица"), None);
    }

    #[test]
    fn test_is_thanks() {
        assert!(is_thanks("Спасибо!"));
        assert!(is_thanks(" thank you. "));
        assert!(!is_thanks("спасибо за рецепт"));
    }

    #[test]
    fn test_benign_errors() {
        let benign = Error::from(telegram::Error::Api {
            code: 400,
            description: "Bad Request: message is not modified".into(),
        });
        assert!(is_benign(&benign));
        assert!(!is_benign(&Error::msg("message is not modified")));
    }

    #[async_std::test]
    async fn test_start() {
        let h = Harness::new().await;
        h.update_user(&[UserField::Products(Some("рис".into()))])
            .await;

        h.text("/start").await;
        assert_eq!(
            h.telegram().take_calls().await,
            [
                Call::SetMyCommands {
                    chat_id: USER,
                    commands: vec!["start".into(), "my_recipes".into(), "author".into()],
                },
                sent(messages::WELCOME, None),
            ]
        );
        let user = h.user().await;
        assert_eq!(user.products, None);
        assert_eq!(user.state, None);

        h.text_from(ADMIN, "/start@chef_bot").await;
        match &h.telegram().calls().await[0] {
            Call::SetMyCommands { commands, .. } => assert_eq!(
                commands,
                &["start", "my_recipes", "author", "admin", "stats"]
            ),
            call => panic!("unexpected call {call:?}"),
        }
    }

    #[async_std::test]
    async fn test_author_and_unknown_command() {
        let h = Harness::new().await;
        h.text("/author").await;
        h.text("/nonsense").await;
        assert_eq!(h.telegram().sent_texts().await, [messages::AUTHOR]);
    }

    #[async_std::test]
    async fn test_products_flow() {
        let h = Harness::new().await;
        h.model().push_reply(r#"{"valid": true}"#).await;

        h.text("курица, рис, лук").await;
        assert_eq!(
            h.telegram().take_calls().await,
            [sent(
                messages::accepted("курица, рис, лук"),
                Some(keyboards::confirmation())
            )]
        );
        let user = h.user().await;
        assert_eq!(user.products(), Some("курица, рис, лук"));
        assert_eq!(user.state, Some(UserState::EnteringProducts));

        // Later additions are not validated.
        h.text("сыр").await;
        assert_eq!(
            h.telegram().take_calls().await,
            [sent(
                messages::added("сыр", "курица, рис, лук, сыр"),
                Some(keyboards::confirmation())
            )]
        );
        assert_eq!(h.user().await.products(), Some("курица, рис, лук, сыр"));
        assert_eq!(h.model().prompts().await.len(), 1);
    }

    #[async_std::test]
    async fn test_not_products() {
        let h = Harness::new().await;
        h.model().push_reply(r#"{"valid": false}"#).await;
        h.text("асдфг").await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [messages::not_products("асдфг")]
        );
        assert_eq!(h.user().await.products, None);
    }

    #[async_std::test]
    async fn test_too_many_products() {
        let h = Harness::new().await;
        let products = "а".repeat(MAX_PRODUCTS_LENGTH - 5);
        h.update_user(&[UserField::Products(Some(products.clone()))])
            .await;

        h.text("морковь").await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [messages::too_many_products(&products, MAX_PRODUCTS_LENGTH)]
        );
        assert_eq!(h.user().await.products, Some(products));
    }

    #[async_std::test]
    async fn test_thanks() {
        let h = Harness::new().await;
        h.update_user(&[UserField::State(Some(UserState::RecipeSent))])
            .await;

        h.text("Спасибо!").await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [messages::YOU_ARE_WELCOME]
        );
        assert_eq!(h.user().await.state, None);

        // Thanks out of the blue are not answered, nor taken for products.
        h.text("спасибо").await;
        assert_eq!(h.telegram().sent_texts().await.len(), 1);
        assert!(h.model().prompts().await.is_empty());
    }

    #[async_std::test]
    async fn test_greeting_and_spam() {
        let h = Harness::new().await;
        h.text("Привет!").await;
        h.text("ААААААААА").await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [
                messages::GREETING_HINT.to_string(),
                messages::invalid_input("Сообщение выглядит как спам"),
            ]
        );
        assert!(h.model().prompts().await.is_empty());
    }

    #[async_std::test]
    async fn test_direct_recipe() {
        let h = Harness::new().await;
        h.model().push_reply("Карбонара\n\nШаги").await;

        h.text("Дай рецепт Пасты карбонара").await;
        let dish = "пасты карбонара";
        let recipe = format!("Карбонара\n\nШаги{}", crate::chef::BON_APPETIT);
        assert_eq!(
            h.telegram().take_calls().await,
            [
                sent(messages::searching_recipe(dish), None),
                deleted(1000),
                sent(
                    recipe.clone(),
                    Some(keyboards::recipe(false, None, Some(dish)))
                ),
            ]
        );

        let user = h.user().await;
        assert_eq!(user.state, Some(UserState::RecipeSent));
        let temp = user.session.temp_recipe.as_ref().unwrap();
        assert_eq!(temp.name, dish);
        assert_eq!(temp.text, recipe);
        assert_eq!(temp.products, "");
        assert_eq!(user.session.last_bot_message(), Some(recipe.as_str()));

        h.text("дай рецепт ").await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [messages::DISH_NAME_MISSING]
        );
    }

    #[async_std::test]
    async fn test_direct_recipe_failure() {
        let h = Harness::new().await;
        h.model().push_failure().await;
        h.text("дай рецепт борща").await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [
                messages::searching_recipe("борща"),
                messages::FREESTYLE_FAILED.to_string(),
            ]
        );
        assert_eq!(h.user().await.session.temp_recipe, None);
    }

    #[async_std::test]
    async fn test_recipe_request_intent() {
        let h = Harness::new().await;
        h.model().push_reply("Плов").await;
        h.text("хочу приготовить плов").await;
        let temp = h.user().await.session.temp_recipe.unwrap();
        assert_eq!(temp.name, "Плов");
        assert_eq!(h.model().prompts().await[0].task, crate::llm::Task::Freestyle);
    }

    #[async_std::test]
    async fn test_cooking_flow() {
        let h = Harness::new().await;
        h.update_user(&[UserField::Products(Some("курица, рис".into()))])
            .await;

        // Categories.
        h.model().push_reply(r#"["soup", "main"]"#).await;
        h.callback(Callback::Cook).await;
        let categories = vec!["soup".to_string(), "main".to_string()];
        assert_eq!(
            h.telegram().take_calls().await,
            [
                answered(None, false),
                deleted(CALLBACK_MESSAGE),
                sent(messages::ANALYZING, None),
                deleted(1000),
                sent(
                    messages::choose_category("курица, рис"),
                    Some(keyboards::categories(&categories))
                ),
            ]
        );
        let user = h.user().await;
        assert_eq!(user.session.categories, categories);
        assert_eq!(user.state, Some(UserState::SelectingCategory));

        // Dishes.
        h.model()
            .push_reply(r#"[{"name": "Куриный суп", "desc": "Наваристый"}]"#)
            .await;
        h.callback(Callback::Category("soup".into())).await;
        let dishes = vec![crate::recipe::Dish {
            name: "Куриный суп".into(),
            desc: "Наваристый".into(),
        }];
        assert_eq!(
            h.telegram().take_calls().await,
            [
                answered(Some("Выбрано: 🍲 Супы"), false),
                deleted(CALLBACK_MESSAGE),
                sent(messages::picking_dishes("soup"), None),
                deleted(1002),
                sent(
                    messages::menu("soup", &dishes),
                    Some(keyboards::dishes(&dishes))
                ),
            ]
        );
        let user = h.user().await;
        assert_eq!(user.session.generated_dishes, dishes);
        assert_eq!(user.state, Some(UserState::SelectingDish));

        // Recipe.
        h.model().push_reply("Куриный суп\n\nВарить час").await;
        h.callback(Callback::Dish(0)).await;
        let recipe = format!("Куриный суп\n\nВарить час{}", crate::chef::BON_APPETIT);
        assert_eq!(
            h.telegram().take_calls().await,
            [
                answered(Some("Выбрано: Куриный суп..."), false),
                sent(messages::writing_recipe("Куриный суп"), None),
                deleted(1004),
                sent(
                    recipe.clone(),
                    Some(keyboards::recipe(true, None, Some("Куриный суп")))
                ),
            ]
        );
        let user = h.user().await;
        assert_eq!(user.state, Some(UserState::RecipeSent));
        let temp = user.session.temp_recipe.unwrap();
        assert_eq!(temp.products, "курица, рис");
        assert_eq!(temp.text, recipe);
        assert!(h.model().prompts().await[2]
            .system
            .contains("ДОСТУПНЫЕ ПРОДУКТЫ: курица, рис"));

        h.callback(Callback::Dish(5)).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [answered(Some(messages::DISH_NOT_FOUND), true)]
        );

        // Back to the categories offered earlier.
        h.callback(Callback::BackToCategories).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [
                deleted(CALLBACK_MESSAGE),
                sent(
                    messages::CHOOSE_CATEGORY_AGAIN,
                    Some(keyboards::categories(&categories))
                ),
                answered(None, false),
            ]
        );
    }

    #[async_std::test]
    async fn test_single_category_goes_to_dishes() {
        let h = Harness::new().await;
        h.update_user(&[UserField::Products(Some("яблоки".into()))])
            .await;
        h.model().push_reply(r#"["dessert"]"#).await;
        h.model()
            .push_reply(r#"[{"name": "Шарлотка", "desc": "Пирог"}]"#)
            .await;

        h.callback(Callback::Cook).await;
        let user = h.user().await;
        assert_eq!(user.state, Some(UserState::SelectingDish));
        assert_eq!(
            h.telegram().sent_texts().await.last().unwrap(),
            &messages::menu("dessert", &user.session.generated_dishes)
        );
    }

    #[async_std::test]
    async fn test_callbacks_without_products() {
        let h = Harness::new().await;
        h.callback(Callback::Category("soup".into())).await;
        h.callback(Callback::Cook).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [
                answered(Some(messages::ENTER_PRODUCTS_FIRST), true),
                answered(None, false),
                deleted(CALLBACK_MESSAGE),
                sent(messages::NO_PRODUCTS, None),
            ]
        );
    }

    #[async_std::test]
    async fn test_restart_and_add_more() {
        let h = Harness::new().await;
        h.update_user(&[
            UserField::Products(Some("рис".into())),
            UserField::State(Some(UserState::SelectingDish)),
        ])
        .await;

        h.callback(Callback::Restart).await;
        h.callback(Callback::AddMore).await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [messages::SESSION_RESET, messages::ADD_MORE]
        );
        let user = h.user().await;
        assert_eq!(user.products, None);
        assert_eq!(user.state, None);
    }

    #[async_std::test]
    async fn test_unknown_callback() {
        let h = Harness::new().await;
        h.callback("launch_rockets").await;
        assert_eq!(
            h.telegram().take_calls().await,
            [answered(Some(messages::UNKNOWN_COMMAND), false)]
        );
    }

    #[async_std::test]
    async fn test_photo_and_save() {
        let replicate = MockProvider::new(Provider::Replicate, b"jpg".to_vec());
        let h = Harness::with_images(vec![Box::new(replicate)]).await;

        h.callback(Callback::GeneratePhoto).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [answered(Some(messages::NO_RECIPE_FOR_IMAGE), true)]
        );

        let mut session = Session::default();
        session.temp_recipe = Some(temp_recipe("Плов"));
        h.update_user(&[
            UserField::Session(session),
            UserField::State(Some(UserState::RecipeSent)),
        ])
        .await;

        h.callback(Callback::GeneratePhoto).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [
                answered(Some(messages::IMAGE_STARTED), false),
                sent(messages::generating_image("Плов"), None),
                deleted(1000),
                Call::SendPhoto {
                    chat_id: USER,
                    file_name: "Плов.jpg".into(),
                    caption: Some(messages::image_caption("Плов")),
                    markup: None,
                },
            ]
        );
        let user = h.user().await;
        assert_eq!(user.state, Some(UserState::RecipeSent));
        let image = user.session.temp_recipe.unwrap().image_base64;
        assert_eq!(image, Some(STANDARD.encode(b"jpg")));

        h.callback(Callback::SaveRecipe).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [
                answered(Some(messages::SAVED), false),
                Call::EditMessageReplyMarkup {
                    chat_id: USER,
                    message_id: CALLBACK_MESSAGE,
                    markup: Some(keyboards::recipe(false, None, Some("Плов"))),
                },
            ]
        );
        let favorites = h.store.favorites(USER, 10).await.unwrap();
        assert_eq!(favorites.len(), 1);
        let saved = h
            .store
            .favorite(USER, &favorites[0].recipe_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.dish_name, "Плов");
        assert_eq!(saved.products_snapshot, "рис, морковь");
        assert_eq!(saved.image_base64, Some(STANDARD.encode(b"jpg")));

        h.callback(Callback::SaveRecipe).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [answered(Some(messages::ALREADY_SAVED), true)]
        );
    }

    #[async_std::test]
    async fn test_photo_failure() {
        let h = Harness::with_images(vec![Box::new(MockProvider::failing(Provider::Gemini))]).await;
        let mut session = Session::default();
        session.temp_recipe = Some(temp_recipe("Плов"));
        h.update_user(&[UserField::Session(session)]).await;

        h.callback(Callback::GeneratePhoto).await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [messages::generating_image("Плов"), messages::IMAGE_FAILED.to_string()]
        );
        let user = h.user().await;
        assert_eq!(user.state, Some(UserState::RecipeSent));
        assert_eq!(user.session.temp_recipe.unwrap().image_base64, None);
    }

    #[async_std::test]
    async fn test_photo_unavailable() {
        let h = Harness::new().await;
        let mut session = Session::default();
        session.temp_recipe = Some(temp_recipe("Плов"));
        h.update_user(&[UserField::Session(session)]).await;

        h.callback(Callback::GeneratePhoto).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [answered(Some(messages::IMAGE_UNAVAILABLE), true)]
        );
    }

    #[async_std::test]
    async fn test_my_recipes() {
        let h = Harness::new().await;
        h.text("/my_recipes").await;
        assert_eq!(h.telegram().sent_texts().await, [messages::NO_FAVORITES]);
        h.telegram().take_calls().await;

        for i in 0..21 {
            let name = if i == 3 { "Плов".to_string() } else { format!("Суп {i}") };
            h.store
                .insert_favorite(&favorite(&format!("r{i}"), &name, i))
                .await
                .unwrap();
        }

        h.text("/my_recipes").await;
        let calls = h.telegram().take_calls().await;
        let [Call::SendMessage { text, markup: Some(markup), .. }] = calls.as_slice() else {
            panic!("unexpected calls {calls:?}");
        };
        assert!(text.starts_with("📂 <b>Ваши сохраненные рецепты:</b>\n\n1. <b>Суп 0</b> (01.05.2024)\n"));
        assert!(text.ends_with("📝 <i>Показано 20 из 21 рецептов</i>"));
        // 20 recipes and a close button.
        assert_eq!(markup.inline_keyboard.len(), 21);

        h.text("/my_recipes плов").await;
        let found = h.store.favorite(USER, "r3").await.unwrap().unwrap();
        assert_eq!(
            h.telegram().take_calls().await,
            [sent(
                messages::favorites(&messages::search_header("плов"), &[found.clone()], 1),
                Some(keyboards::favorites(&[found]))
            )]
        );

        h.text("/my_recipes борщ").await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [messages::nothing_found("борщ")]
        );
    }

    #[async_std::test]
    async fn test_show_favorite() {
        let h = Harness::new().await;
        let text = "а".repeat(1500);
        h.store
            .insert_favorite(&Favorite {
                recipe_text: text.clone(),
                image_base64: Some(STANDARD.encode(b"jpg")),
                ..favorite("r1", "Плов", 0)
            })
            .await
            .unwrap();
        h.store
            .insert_favorite(&favorite("r2", "Суп", 1))
            .await
            .unwrap();
        let header = messages::favorite_header("Плов");
        let markup = keyboards::recipe(false, Some("r1"), Some("Плов"));

        h.callback(Callback::ShowFavorite("r1".into())).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [
                answered(None, false),
                Call::SendPhoto {
                    chat_id: USER,
                    file_name: "saved_dish.jpg".into(),
                    caption: Some(format!("{header}{}...", "а".repeat(1000))),
                    markup: Some(markup.clone()),
                },
                sent("а".repeat(500), None),
            ]
        );

        // Without a photo, the recipe is sent as text.
        h.telegram().fail_photos();
        h.callback(Callback::ShowFavorite("r1".into())).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [
                answered(None, false),
                sent(format!("{header}{text}"), Some(markup)),
            ]
        );

        h.callback(Callback::ShowFavorite("r2".into())).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [
                answered(None, false),
                sent(
                    format!("{}Рецепт: Суп", messages::favorite_header("Суп")),
                    Some(keyboards::recipe(false, Some("r2"), Some("Суп")))
                ),
            ]
        );

        h.callback(Callback::ShowFavorite("missing".into())).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [answered(Some(messages::FAVORITE_NOT_FOUND), true)]
        );
    }

    #[async_std::test]
    async fn test_delete_favorite() {
        let h = Harness::new().await;
        let remaining = favorite("r2", "Суп", 1);
        h.store
            .insert_favorite(&favorite("r1", "Плов", 0))
            .await
            .unwrap();
        h.store.insert_favorite(&remaining).await.unwrap();

        h.callback(Callback::DeleteFavorite("r1".into())).await;
        let favorites = [remaining];
        assert_eq!(
            h.telegram().take_calls().await,
            [
                answered(Some(messages::DELETED), false),
                Call::EditMessageText {
                    chat_id: USER,
                    message_id: CALLBACK_MESSAGE,
                    text: messages::favorites(messages::FAVORITES_HEADER, &favorites, 1),
                    markup: Some(keyboards::favorites(&favorites)),
                },
            ]
        );

        h.callback(Callback::DeleteFavorite("r2".into())).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [
                answered(Some(messages::DELETED), false),
                Call::EditMessageText {
                    chat_id: USER,
                    message_id: CALLBACK_MESSAGE,
                    text: messages::FAVORITES_EMPTY_HEADER.into(),
                    markup: None,
                },
            ]
        );

        h.callback(Callback::DeleteFavorite("r2".into())).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [answered(Some(messages::DELETE_FAILED), true)]
        );
    }

    #[async_std::test]
    async fn test_voice() {
        let h = Harness::new().await;
        h.telegram().add_file("f1", vec![1, 2, 3]).await;
        h.model().push_transcript("курица, рис").await;
        h.model().push_reply(r#"{"valid": true}"#).await;

        let voice = |file_id: &str| Update {
            update_id: 1,
            message: Some(Message {
                voice: Some(Voice {
                    file_id: file_id.into(),
                    duration: 2,
                    mime_type: Some("audio/ogg".into()),
                    file_size: None,
                }),
                ..message(USER, 7, None)
            }),
            callback_query: None,
        };

        h.bot.handle_update(&voice("f1")).await;
        assert_eq!(
            h.telegram().take_calls().await,
            [
                sent(messages::LISTENING, None),
                deleted(1000),
                deleted(7),
                sent(
                    messages::accepted("курица, рис"),
                    Some(keyboards::confirmation())
                ),
            ]
        );
        assert_eq!(h.user().await.products(), Some("курица, рис"));

        // Nothing recognized.
        h.bot.handle_update(&voice("f1")).await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [messages::LISTENING, messages::VOICE_NOT_RECOGNIZED]
        );
        h.telegram().take_calls().await;

        // The file cannot be downloaded.
        h.bot.handle_update(&voice("f2")).await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [messages::LISTENING, messages::VOICE_FAILED]
        );
    }

    #[async_std::test]
    async fn test_banned_user_is_ignored() {
        let h = Harness::new().await;
        let mut user = User::new(USER);
        user.is_banned = true;
        h.store.put_user(user).await;

        h.text("/start").await;
        h.callback(Callback::Restart).await;
        assert!(h.telegram().calls().await.is_empty());
    }

    #[async_std::test]
    async fn test_username_is_recorded() {
        let h = Harness::new().await;
        h.text("/author").await;
        assert_eq!(h.user().await.username.as_deref(), Some("ann"));
    }

    #[async_std::test]
    async fn test_stats() {
        let h = Harness::new().await;
        h.text("/stats").await;
        assert_eq!(
            h.telegram().sent_texts().await,
            [messages::personal_stats(&RecipeStats::default())]
        );
        h.telegram().take_calls().await;

        h.store
            .insert_favorite(&Favorite {
                recipe_text: "⏱ Время: 40 минут | 🪦 Сложность: низкая".into(),
                ..favorite("r1", "Плов", 0)
            })
            .await
            .unwrap();
        h.text("/stats").await;
        let text = &h.telegram().sent_texts().await[0];
        assert!(text.contains("Сохранено рецептов: 1"));
        assert!(text.contains("Среднее время приготовления: 40 мин"));

        h.text_from(ADMIN, "/stats").await;
        let text = h.telegram().sent_texts().await.pop().unwrap();
        assert!(text.starts_with("📊 <b>СТАТИСТИКА СИСТЕМЫ</b>"));
        assert!(text.contains("• Всего: 2\n"));
        assert!(text.contains("• Рецептов сохранено: 1\n"));
        assert!(text.contains("• Gemini использовано сегодня: 0/50"));
    }

    #[async_std::test]
    async fn test_admin() {
        let h = Harness::new().await;
        h.text("/admin").await;
        assert!(h.telegram().calls().await.is_empty());

        h.text_from(ADMIN, "/admin").await;
        let text = h.telegram().sent_texts().await.pop().unwrap();
        assert!(text.starts_with("🛠 <b>Панель администратора</b>"));
        assert!(text.contains(&format!("<code>{USER}</code> @ann")));
        assert!(text.contains(&format!("<code>{ADMIN}</code> @ann")));
    }

    #[async_std::test]
    async fn test_promo() {
        let h = Harness::new().await;
        store::create_promo_code(&h.store, "chef", 7, 1)
            .await
            .unwrap();

        h.text("/promo").await;
        h.text("/promo nope").await;
        h.text("/promo chef").await;
        let texts = h.telegram().sent_texts().await;
        assert_eq!(texts[0], messages::PROMO_MISSING);
        assert_eq!(texts[1], messages::promo(&store::PromoActivation::NotFound));
        assert!(texts[2].starts_with("🎉 <b>Промокод активирован!</b>\nПремиум на 7 дн."));
        assert!(h.user().await.has_premium(Utc::now()));

        h.text("/promo CHEF").await;
        assert_eq!(
            h.telegram().sent_texts().await[3],
            messages::promo(&store::PromoActivation::LimitReached)
        );
    }

    #[async_std::test]
    async fn test_run() {
        let h = Harness::new().await;
        let update = |update_id, text: &str| Update {
            update_id,
            message: Some(message(USER, 1, Some(text))),
            callback_query: None,
        };
        h.telegram()
            .push_updates(vec![update(10, "/author"), update(11, "/start")])
            .await;

        timeout(std::time::Duration::from_millis(200), h.bot.run())
            .await
            .unwrap_err();

        let calls = h.telegram().calls().await;
        assert_eq!(
            calls[0],
            Call::DeleteWebhook {
                drop_pending_updates: true
            }
        );
        let texts = h.telegram().sent_texts().await;
        assert_eq!(texts.len(), 2);
        assert!(texts.contains(&messages::AUTHOR.to_string()));
        assert!(texts.contains(&messages::WELCOME.to_string()));
    }
}
