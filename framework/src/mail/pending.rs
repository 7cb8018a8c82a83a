//! Recipients gathered before the mailable to send is known.

use std::time::Duration;

use uuid::Uuid;

use super::address::{HasMailAddress, IntoAddresses, RecipientList};
use super::mailable::{MailDefinition, Mailable};
use super::mailer::Mailer;
use super::manager::MailManager;
use super::sent::SentMessage;
use super::MailError;

/// Where a [`PendingMail`] dispatches to.
#[derive(Clone, Copy)]
pub enum Target<'a> {
    Mailer(&'a Mailer),
    Manager(&'a MailManager),
}

/// Addresses a mailable at dispatch time.
///
/// The pending recipients replace the mailable's own `to`/`cc`/`bcc`; its subject, views
/// and attachments are left as they are.
///
/// ```ignore
/// manager.to(&user).cc("audit@example.com").send(&Mailable::new(Welcome::default())).await?;
/// ```
pub struct PendingMail<'a> {
    target: Target<'a>,
    to: RecipientList,
    cc: RecipientList,
    bcc: RecipientList,
    locale: Option<String>,
}

impl<'a> PendingMail<'a> {
    pub fn new(target: Target<'a>) -> Self {
        Self {
            target,
            to: RecipientList::new(),
            cc: RecipientList::new(),
            bcc: RecipientList::new(),
            locale: None,
        }
    }

    pub fn to(mut self, users: impl IntoAddresses) -> Self {
        self.to.extend(users);
        self
    }

    /// Adds `user` as a recipient and, unless a locale is already set, adopts the user's
    /// preferred locale.
    pub fn to_recipient(mut self, user: &dyn HasMailAddress) -> Self {
        if self.locale.is_none() {
            self.locale = user.preferred_locale();
        }
        self.to.extend(user);
        self
    }

    pub fn cc(mut self, users: impl IntoAddresses) -> Self {
        self.cc.extend(users);
        self
    }

    pub fn bcc(mut self, users: impl IntoAddresses) -> Self {
        self.bcc.extend(users);
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub async fn send<M: MailDefinition>(
        &self,
        mailable: &Mailable<M>,
    ) -> Result<Option<SentMessage>, MailError> {
        let mailable = self.fill(mailable);
        match self.target {
            Target::Mailer(mailer) => mailer.send_mailable(&mailable).await,
            Target::Manager(manager) => manager.send(&mailable).await,
        }
    }

    pub async fn queue<M: MailDefinition>(
        &self,
        mailable: &Mailable<M>,
    ) -> Result<Uuid, MailError> {
        let mailable = self.fill(mailable);
        match self.target {
            Target::Mailer(mailer) => mailer.queue(&mailable, None).await,
            Target::Manager(manager) => manager.queue(&mailable, None).await,
        }
    }

    pub async fn later<M: MailDefinition>(
        &self,
        delay: Duration,
        mailable: &Mailable<M>,
    ) -> Result<Uuid, MailError> {
        let mailable = self.fill(mailable);
        match self.target {
            Target::Mailer(mailer) => mailer.later(delay, &mailable, None).await,
            Target::Manager(manager) => manager.later(delay, &mailable, None).await,
        }
    }

    fn fill<M: MailDefinition>(&self, mailable: &Mailable<M>) -> Mailable<M> {
        let mut mailable = mailable.clone();
        let state = mailable.state_mut();
        state.to.replace(self.to.clone());
        state.cc.replace(self.cc.clone());
        state.bcc.replace(self.bcc.clone());
        if let Some(locale) = &self.locale {
            state.locale = locale.clone();
        }
        mailable
    }
}
