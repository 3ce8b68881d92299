//! Rendering `${{ ... }}` templates against a job's data

use keel_core::domain::trigger::Event;
use keel_core::template::{EventField, Reference, Template, TemplateError};
use std::collections::BTreeMap;

use crate::env::EnvSnapshot;
use crate::secrets::ResolvedSecrets;

/// Values a template may reference
///
/// Secrets are only reachable when the context was built with
/// [`with_secrets`](Self::with_secrets).
pub struct RenderContext<'a> {
    env: &'a EnvSnapshot,
    event: &'a Event,
    secrets: Option<&'a ResolvedSecrets>,
}

impl<'a> RenderContext<'a> {
    pub fn new(env: &'a EnvSnapshot, event: &'a Event) -> Self {
        Self {
            env,
            event,
            secrets: None,
        }
    }

    pub fn with_secrets(mut self, secrets: &'a ResolvedSecrets) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn render(&self, source: &str) -> Result<String, TemplateError> {
        Template::parse(source)?.render(|reference| self.lookup(reference))
    }

    pub fn render_map(
        &self,
        values: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, TemplateError> {
        values
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.render(value)?)))
            .collect()
    }

    fn lookup(&self, reference: &Reference) -> Option<String> {
        match reference {
            Reference::Secret(name) => self
                .secrets
                .and_then(|secrets| secrets.get(name))
                .map(|value| value.expose().to_string()),
            Reference::Env(name) => self.env.get(name).map(str::to_string),
            Reference::Event(field) => Some(event_field(self.event, *field)),
        }
    }
}

/// Event fields that do not apply to the event render as empty strings
pub fn event_field(event: &Event, field: EventField) -> String {
    let git_ref = event.ref_name().ok();
    match field {
        EventField::Kind => event.kind.to_string(),
        EventField::Ref => event.git_ref.clone(),
        EventField::Branch => git_ref
            .as_ref()
            .and_then(|r| r.branch())
            .unwrap_or_default()
            .to_string(),
        EventField::Tag => git_ref
            .as_ref()
            .and_then(|r| r.tag())
            .unwrap_or_default()
            .to_string(),
        EventField::Sha => event.sha.clone().unwrap_or_default(),
        EventField::Repository => event.repository.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_env_and_event() {
        let env = EnvSnapshot::default().overlay([("IMAGE", "quay.io/org/ubi8")]);
        let event = Event::push("org/ubi8", "refs/heads/main").with_sha("abc123");
        let ctx = RenderContext::new(&env, &event);

        assert_eq!(
            ctx.render("${{ env.IMAGE }}:${{ event.sha }}").unwrap(),
            "quay.io/org/ubi8:abc123"
        );
        assert_eq!(ctx.render("${{ event.branch }}").unwrap(), "main");
        assert_eq!(ctx.render("[${{ event.tag }}]").unwrap(), "[]");
        assert_eq!(
            ctx.render("${{ env.MISSING }}"),
            Err(TemplateError::Unresolved("env.MISSING".to_string()))
        );
    }

    #[test]
    fn test_secrets_need_explicit_grant() {
        let env = EnvSnapshot::default();
        let event = Event::push("org/ubi8", "main");
        let secrets = ResolvedSecrets::default();

        let ctx = RenderContext::new(&env, &event);
        assert!(ctx.render("${{ secrets.TOKEN }}").is_err());

        let ctx = RenderContext::new(&env, &event).with_secrets(&secrets);
        assert!(ctx.render("${{ secrets.TOKEN }}").is_err());
    }
}
