use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use super::address::IntoAddresses;
use super::config::{GlobalAddress, MailConfig, MailerConfig};
use super::events::Events;
use super::locale;
use super::mailable::{MailDefinition, Mailable};
use super::mailer::{BuildMessage, Mailer, RenderedMail};
use super::pending::{PendingMail, Target};
use super::render::ViewRenderer;
use super::sent::SentMessage;
use super::storage::Filesystems;
use super::transport::{
    self, ArrayTransport, FailoverTransport, LogTransport, LoggingTransport, RoundRobinTransport,
    Transport,
};
use super::MailError;
use crate::jobs::QueueManager;

/// Collaborators shared by every mailer: the view renderer, event listeners, storage disks
/// and queue channels.
#[derive(Clone)]
pub struct MailServices {
    pub renderer: Arc<dyn ViewRenderer>,
    pub events: Option<Arc<Events>>,
    pub storage: Arc<Filesystems>,
    pub queues: Arc<QueueManager>,
}

impl MailServices {
    pub fn new(renderer: impl ViewRenderer + 'static) -> Self {
        Self {
            renderer: Arc::new(renderer),
            events: None,
            storage: Arc::new(Filesystems::default()),
            queues: Arc::new(QueueManager::default()),
        }
    }

    pub fn with_events(mut self, events: Events) -> Self {
        self.events = Some(Arc::new(events));
        self
    }

    pub fn with_storage(mut self, storage: Filesystems) -> Self {
        self.storage = Arc::new(storage);
        self
    }

    pub fn with_queues(mut self, queues: QueueManager) -> Self {
        self.queues = Arc::new(queues);
        self
    }
}

/// Builds the transport of a mailer whose `transport` names a registered driver.
pub type TransportFactory =
    Arc<dyn Fn(&MailerConfig) -> Result<Arc<dyn Transport>, MailError> + Send + Sync>;

/// Resolves named mailers from configuration and caches them.
///
/// A mailer is built on first use; its transport is shared by every send through it until
/// [`purge`](Self::purge) or [`forget_mailers`](Self::forget_mailers) drops it.
pub struct MailManager {
    config: MailConfig,
    services: MailServices,
    mailers: RwLock<HashMap<String, Arc<Mailer>>>,
    creators: RwLock<HashMap<String, TransportFactory>>,
}

impl MailManager {
    /// Also installs `config.fallback_locale` as the process fallback locale.
    pub fn new(config: MailConfig, services: MailServices) -> Self {
        locale::set_fallback(config.fallback_locale.clone());
        Self {
            config,
            services,
            mailers: RwLock::new(HashMap::new()),
            creators: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MailConfig {
        &self.config
    }

    pub fn services(&self) -> &MailServices {
        &self.services
    }

    pub fn default_mailer_name(&self) -> &str {
        &self.config.default
    }

    /// The mailer called `name`, or the default mailer.
    pub fn mailer(&self, name: Option<&str>) -> Result<Arc<Mailer>, MailError> {
        self.get(name.unwrap_or(&self.config.default))
    }

    pub fn get(&self, name: &str) -> Result<Arc<Mailer>, MailError> {
        if let Some(mailer) = self
            .mailers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(mailer.clone());
        }

        let mailer = Arc::new(self.resolve(name)?);
        let mut mailers = self.mailers.write().unwrap_or_else(PoisonError::into_inner);
        Ok(mailers.entry(name.to_string()).or_insert(mailer).clone())
    }

    /// Register a transport driver. Mailers whose `transport` is `driver` are built by
    /// `factory`; registered drivers take precedence over the built-in ones.
    pub fn extend(
        &self,
        driver: impl Into<String>,
        factory: impl Fn(&MailerConfig) -> Result<Arc<dyn Transport>, MailError>
            + Send
            + Sync
            + 'static,
    ) -> &Self {
        self.creators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(driver.into(), Arc::new(factory));
        self
    }

    /// Drop a cached mailer (the default one when `name` is `None`); the next lookup
    /// builds it again.
    pub fn purge(&self, name: Option<&str>) {
        let name = name.unwrap_or(&self.config.default);
        self.mailers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    pub fn forget_mailers(&self) -> &Self {
        self.mailers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self
    }

    fn resolve(&self, name: &str) -> Result<Mailer, MailError> {
        let config = self
            .config
            .mailers
            .get(name)
            .ok_or_else(|| MailError::MailerNotDefined(name.to_string()))?;

        let transport = self.create_transport(config)?;
        debug!(mailer = %name, transport = %transport, "resolved mailer");

        let mut mailer = Mailer::new(name, transport, self.services.clone());
        let global = |own: &Option<GlobalAddress>, shared: &GlobalAddress| {
            own.as_ref()
                .and_then(GlobalAddress::to_address)
                .or_else(|| shared.to_address())
        };
        if let Some(address) = global(&config.from, &self.config.from) {
            mailer.always_from(address);
        }
        if let Some(address) = global(&config.reply_to, &self.config.reply_to) {
            mailer.always_reply_to(address);
        }
        if let Some(address) = global(&config.to, &self.config.to) {
            mailer.always_to(address);
        }
        if let Some(address) = global(&config.return_path, &self.config.return_path) {
            mailer.always_return_path(address);
        }
        Ok(mailer)
    }

    /// Build the transport described by `config`.
    ///
    /// Registered drivers are tried first, then `failover`, `roundrobin`, `array` and
    /// `log`. Without a `transport` the `dsn` is parsed, and the result is wrapped in a
    /// [`LoggingTransport`] when the mail logger is enabled.
    pub fn create_transport(&self, config: &MailerConfig) -> Result<Arc<dyn Transport>, MailError> {
        self.build_transport(config, &mut Vec::new())
    }

    fn build_transport(
        &self,
        config: &MailerConfig,
        chain: &mut Vec<String>,
    ) -> Result<Arc<dyn Transport>, MailError> {
        let Some(driver) = config.transport.as_deref() else {
            let dsn = config
                .dsn
                .as_deref()
                .filter(|dsn| !dsn.trim().is_empty())
                .ok_or(MailError::MissingDsn)?;
            let transport = transport::from_dsn(dsn)?;
            if self.config.logger.enabled {
                return Ok(Arc::new(LoggingTransport::new(transport, &self.config.logger)));
            }
            return Ok(transport);
        };

        let creator = self
            .creators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(driver)
            .cloned();
        if let Some(creator) = creator {
            return creator(config);
        }

        match driver {
            "failover" => {
                let members = self.members(config, chain)?;
                let retry_after = Duration::from_secs(config.retry_after);
                Ok(Arc::new(FailoverTransport::new(members).retry_after(retry_after)))
            }
            "roundrobin" => {
                let members = self.members(config, chain)?;
                let retry_after = Duration::from_secs(config.retry_after);
                Ok(Arc::new(RoundRobinTransport::new(members).retry_after(retry_after)))
            }
            "array" => Ok(Arc::new(ArrayTransport::new())),
            "log" => Ok(Arc::new(LogTransport::from_options(&config.options))),
            other => Err(MailError::UnsupportedTransport(other.to_string())),
        }
    }

    /// Transports of the mailers a failover / round-robin config lists, in order.
    fn members(
        &self,
        config: &MailerConfig,
        chain: &mut Vec<String>,
    ) -> Result<Vec<Arc<dyn Transport>>, MailError> {
        let mut transports = Vec::with_capacity(config.mailers.len());
        for name in &config.mailers {
            if chain.contains(name) {
                return Err(MailError::UnsupportedTransport(format!(
                    "{name} lists itself as a member"
                )));
            }
            let member = self
                .config
                .mailers
                .get(name)
                .ok_or_else(|| MailError::MailerNotDefined(name.clone()))?;
            let member = if self.config.legacy_driver_mode {
                MailerConfig {
                    transport: Some(name.clone()),
                    ..member.clone()
                }
            } else {
                member.clone()
            };

            chain.push(name.clone());
            let transport = self.build_transport(&member, chain);
            chain.pop();
            transports.push(transport?);
        }
        Ok(transports)
    }

    /// Send through the mailer the mailable names, or the default one.
    pub async fn send<M: MailDefinition>(
        &self,
        mailable: &Mailable<M>,
    ) -> Result<Option<SentMessage>, MailError> {
        mailable.send(self).await
    }

    pub async fn queue<M: MailDefinition>(
        &self,
        mailable: &Mailable<M>,
        queue: Option<&str>,
    ) -> Result<Uuid, MailError> {
        let mailer = self.mailer(mailable.state().mailer.as_deref())?;
        mailer.queue(mailable, queue).await
    }

    pub async fn later<M: MailDefinition>(
        &self,
        delay: Duration,
        mailable: &Mailable<M>,
        queue: Option<&str>,
    ) -> Result<Uuid, MailError> {
        let mailer = self.mailer(mailable.state().mailer.as_deref())?;
        mailer.later(delay, mailable, queue).await
    }

    pub async fn html(
        &self,
        html: impl Into<String>,
        build: impl BuildMessage,
    ) -> Result<Option<SentMessage>, MailError> {
        self.mailer(None)?.html(html, build).await
    }

    pub async fn raw(
        &self,
        text: impl Into<String>,
        build: impl BuildMessage,
    ) -> Result<Option<SentMessage>, MailError> {
        self.mailer(None)?.raw(text, build).await
    }

    pub async fn render<M: MailDefinition>(
        &self,
        mailable: &Mailable<M>,
    ) -> Result<String, MailError> {
        let mailer = self.mailer(mailable.state().mailer.as_deref())?;
        mailable.render(&mailer).await
    }

    pub async fn render_bodies<M: MailDefinition>(
        &self,
        mailable: &Mailable<M>,
    ) -> Result<RenderedMail, MailError> {
        let mailer = self.mailer(mailable.state().mailer.as_deref())?;
        mailable.render_bodies(&mailer).await
    }

    pub fn to(&self, users: impl IntoAddresses) -> PendingMail<'_> {
        PendingMail::new(Target::Manager(self)).to(users)
    }

    pub fn cc(&self, users: impl IntoAddresses) -> PendingMail<'_> {
        PendingMail::new(Target::Manager(self)).cc(users)
    }

    pub fn bcc(&self, users: impl IntoAddresses) -> PendingMail<'_> {
        PendingMail::new(Target::Manager(self)).bcc(users)
    }

    pub fn locale(&self, locale: impl Into<String>) -> PendingMail<'_> {
        PendingMail::new(Target::Manager(self)).locale(locale)
    }
}
