use crate::cli::{AddLyricArgs, AdminAction, RegisterArgs, SettingsAction};
use crate::player;
use kalaam_core::{
    ContentRepository, CoreError, DisplaySettings, HttpAudioLoader, KalaamConfig, LibraryStore,
    Lyric, LyricView, NewLyric, NewUser, Playable, PlaybackController, ProfileUpdate, Reciter,
    User,
};
use kalaam_gemini::GeminiProvider;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type Result<T> = std::result::Result<T, CoreError>;

/// Shared state for one CLI invocation
pub struct Context {
    pub config: KalaamConfig,
    pub store: Arc<LibraryStore>,
    pub user_email: Option<String>,
    pub cancel: CancellationToken,
}

impl Context {
    /// Sign in as the `--user` account.
    async fn user(&self) -> Result<User> {
        let email = self
            .user_email
            .as_deref()
            .ok_or_else(|| CoreError::InvalidInput {
                reason: "pass --user EMAIL or set KALAAM_USER".to_string(),
            })?;
        self.store.login(email).await
    }

    async fn admin(&self) -> Result<User> {
        let user = self.user().await?;
        user.ensure_admin()?;
        Ok(user)
    }

    async fn lyric(&self, user: &User, id: &str) -> Result<Lyric> {
        self.store
            .lyric(&user.id, id)
            .await?
            .ok_or_else(|| CoreError::not_found("lyric", id))
    }

    fn provider(&self) -> Result<Arc<GeminiProvider>> {
        let provider = self.config.require_provider()?;
        Ok(Arc::new(GeminiProvider::new(provider)?))
    }

    /// Build a reciter; `audible` also connects the sound card when enabled.
    fn reciter(&self, provider: Arc<GeminiProvider>, audible: bool) -> Result<Reciter> {
        let playback = &self.config.playback;
        let loader =
            HttpAudioLoader::new(playback.static_timeout(), playback.validate_content_type)?;

        let reciter = Reciter::new(
            PlaybackController::new(playback.progress_interval()),
            Arc::new(loader),
            provider,
        )
        .with_synthesis_format(playback.synthesis_sample_rate, playback.synthesis_channels);

        if audible && playback.audio_output {
            Ok(attach_output(reciter))
        } else {
            Ok(reciter)
        }
    }

    async fn view(&self, lyric_id: &str, audible: bool) -> Result<LyricView> {
        let user = self.user().await?;
        let provider = self.provider()?;
        let reciter = self.reciter(Arc::clone(&provider), audible)?;
        let store: Arc<dyn ContentRepository> = self.store.clone();
        LyricView::open(store, reciter, provider, &user.id, lyric_id).await
    }
}

pub async fn register(ctx: &Context, args: RegisterArgs) -> Result<()> {
    let user = ctx
        .store
        .register(NewUser {
            username: args.username,
            name: args.name,
            email: args.email,
            phone: args.phone,
        })
        .await?;

    println!("Registered {} ({}) as {}", user.username, user.email, user.role);
    Ok(())
}

pub async fn login(ctx: &Context) -> Result<()> {
    let user = ctx.user().await?;
    println!("Signed in as {} <{}> [{}]", user.username, user.email, user.role);
    Ok(())
}

pub async fn categories(ctx: &Context) -> Result<()> {
    let user = ctx.user().await?;
    for category in ctx.store.categories(&user.id).await? {
        println!("{:>3}. {}  [{}]", category.serial, category.name, category.id);
    }
    Ok(())
}

pub async fn sub_categories(ctx: &Context, category: Option<&str>) -> Result<()> {
    let user = ctx.user().await?;
    for sub in ctx.store.sub_categories(&user.id, category).await? {
        println!(
            "{:>3}. {}  [{} in {}]",
            sub.serial, sub.name, sub.id, sub.category_id
        );
    }
    Ok(())
}

pub async fn lyrics(ctx: &Context, sub_category: Option<&str>) -> Result<()> {
    let user = ctx.user().await?;
    print_lyrics(&ctx.store.lyrics(&user.id, sub_category).await?);
    Ok(())
}

pub async fn show(ctx: &Context, id: &str) -> Result<()> {
    let user = ctx.user().await?;
    let lyric = ctx.lyric(&user, id).await?;

    println!("{}\n", lyric.title);
    for couplet in lyric.couplets() {
        println!("{}", couplet.first);
        if let Some(second) = couplet.second {
            println!("{second}");
        }
        println!();
    }
    if let Some(url) = lyric.static_audio() {
        println!("Recording: {url}");
    }
    Ok(())
}

pub async fn search(ctx: &Context, query: &str, favorites: bool) -> Result<()> {
    let user = ctx.user().await?;
    let hits = ctx.store.search_lyrics(&user.id, query, favorites).await?;
    if hits.is_empty() {
        println!("No lyrics found");
    }
    print_lyrics(&hits);
    Ok(())
}

pub async fn favorite(ctx: &Context, id: &str) -> Result<()> {
    let user = ctx.user().await?;
    let lyric = ctx.lyric(&user, id).await?;
    let added = ctx.store.toggle_favorite(&user.id, &lyric.id).await?;
    println!(
        "{} {}",
        if added { "Added to favorites:" } else { "Removed from favorites:" },
        lyric.title
    );
    Ok(())
}

pub async fn add_category(ctx: &Context, name: &str) -> Result<()> {
    let user = ctx.user().await?;
    let category = ctx.store.add_category(&user.id, name).await?;
    println!("Added category {} [{}]", category.name, category.id);
    Ok(())
}

pub async fn add_sub_category(ctx: &Context, category: &str, name: &str) -> Result<()> {
    let user = ctx.user().await?;
    let sub = ctx.store.add_sub_category(&user.id, category, name).await?;
    println!("Added sub-category {} [{}]", sub.name, sub.id);
    Ok(())
}

pub async fn add_lyric(ctx: &Context, args: AddLyricArgs) -> Result<()> {
    let user = ctx.user().await?;
    let content = match (args.content, args.content_file) {
        (Some(content), _) => content,
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => {
            return Err(CoreError::InvalidInput {
                reason: "either --content or --content-file is required".to_string(),
            })
        }
    };

    let lyric = ctx
        .store
        .add_lyric(
            &user.id,
            NewLyric {
                sub_category_id: args.sub_category,
                title: args.title,
                content,
                audio_url: args.audio_url,
            },
        )
        .await?;
    println!("Added lyric {} [{}]", lyric.title, lyric.id);
    Ok(())
}

pub async fn settings(ctx: &Context, action: Option<SettingsAction>) -> Result<()> {
    let user = ctx.user().await?;
    if let Some(SettingsAction::Profile { name, email, phone }) = action {
        return update_profile(ctx, &user, ProfileUpdate { name, email, phone }).await;
    }

    let mut settings = ctx.store.display_settings(&user.id).await?;
    if settings == DisplaySettings::default() {
        settings = ctx.config.display.clone();
    }

    if let Some(SettingsAction::Set {
        background_color,
        text_color,
        font_size,
        line_height,
    }) = action
    {
        if let Some(color) = background_color {
            settings.background_color = color;
        }
        if let Some(color) = text_color {
            settings.text_color = color;
        }
        if let Some(size) = font_size {
            settings.font_size = size;
        }
        if let Some(height) = line_height {
            settings.line_height = height;
        }
        ctx.store.save_display_settings(&user.id, &settings).await?;
        info!("Saved display settings for {}", user.email);
    }

    println!("background_color = {}", settings.background_color);
    println!("text_color = {}", settings.text_color);
    println!("font_size = {}", settings.font_size);
    println!("line_height = {}", settings.line_height);
    Ok(())
}

async fn update_profile(ctx: &Context, user: &User, update: ProfileUpdate) -> Result<()> {
    if update.is_empty() {
        return Err(CoreError::InvalidInput {
            reason: "pass at least one of --name, --email or --phone".to_string(),
        });
    }

    let updated = ctx.store.update_profile(&user.id, update).await?;
    info!("Updated profile of {}", updated.id);
    println!("name = {}", updated.name);
    println!("email = {}", updated.email);
    println!("phone = {}", updated.phone);
    if updated.email != user.email {
        println!("Sign in with {} from now on", updated.email);
    }
    Ok(())
}

pub async fn explain(ctx: &Context, id: &str) -> Result<()> {
    let view = ctx.view(id, false).await?;
    println!("{}\n", view.lyric().title);
    println!("{}", view.interpret().await);
    view.close().await;
    Ok(())
}

pub async fn play(ctx: &Context, id: &str, save: Option<&Path>) -> Result<()> {
    if let Some(path) = save {
        let user = ctx.user().await?;
        let lyric = ctx.lyric(&user, id).await?;
        let reciter = ctx.reciter(ctx.provider()?, false)?;
        let handle = reciter.resolve(&lyric).await?;
        player::write_wav(handle.audio(), path)?;
        println!("Saved {} recitation to {}", handle.kind(), path.display());
        return Ok(());
    }

    let view = ctx.view(id, true).await?;
    println!("{}", view.lyric().title);
    player::run(view, ctx.cancel.clone()).await
}

pub async fn admin(ctx: &Context, action: AdminAction) -> Result<()> {
    let actor = ctx.admin().await?;

    match action {
        AdminAction::Users => {
            for user in ctx.store.users().await? {
                println!(
                    "{}  {} <{}> {} {}",
                    user.id,
                    user.username,
                    user.email,
                    user.role,
                    if user.is_enabled { "enabled" } else { "disabled" }
                );
            }
        }
        AdminAction::Enable { user_id } => {
            ctx.store.update_user_enabled(&user_id, true).await?;
            println!("Enabled {user_id}");
        }
        AdminAction::Disable { user_id } => {
            actor.ensure_can_manage(&user_id)?;
            ctx.store.update_user_enabled(&user_id, false).await?;
            println!("Disabled {user_id}");
        }
        AdminAction::ToggleSignup => {
            let mut settings = ctx.store.global_settings().await?;
            settings.is_signup_enabled = !settings.is_signup_enabled;
            ctx.store.save_global_settings(&settings).await?;
            println!("Signup enabled: {}", settings.is_signup_enabled);
        }
        AdminAction::ToggleLogin => {
            let mut settings = ctx.store.global_settings().await?;
            settings.is_login_enabled = !settings.is_login_enabled;
            ctx.store.save_global_settings(&settings).await?;
            println!("Login enabled: {}", settings.is_login_enabled);
        }
        AdminAction::Logo { url } => {
            let mut settings = ctx.store.global_settings().await?;
            settings.logo_url = url.filter(|u| !u.trim().is_empty());
            ctx.store.save_global_settings(&settings).await?;
            println!(
                "Logo: {}",
                settings.logo_url.as_deref().unwrap_or("(default)")
            );
        }
    }
    Ok(())
}

#[cfg(feature = "audio-output")]
fn attach_output(reciter: Reciter) -> Reciter {
    match kalaam_core::DeviceSink::open() {
        Ok(sink) => reciter.with_output(Arc::new(sink)),
        Err(e) => {
            warn!("{e}; showing progress only");
            reciter
        }
    }
}

#[cfg(not(feature = "audio-output"))]
fn attach_output(reciter: Reciter) -> Reciter {
    warn!("Built without the audio-output feature; showing progress only");
    reciter
}

fn print_lyrics(lyrics: &[Lyric]) {
    for lyric in lyrics {
        let marker = if lyric.static_audio().is_some() { "♪" } else { " " };
        println!("{:>3}. {} {}  [{}]", lyric.serial, marker, lyric.title, lyric.id);
    }
}
