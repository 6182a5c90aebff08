//! Hard-coded registry passwords for job containers and services.

use actions_syntax::{Container, Job};

use super::{OnJobEnter, Rule, RuleLoadError, RuleState, Sink, hooks, rule_meta};

pub(crate) struct Credentials;

rule_meta!(
    Credentials,
    "credentials",
    "Checks for hard-coded credentials in container and service definitions"
);

impl Rule for Credentials {
    fn new(_: &RuleState) -> Result<Self, RuleLoadError> {
        Ok(Self)
    }

    fn honors_trigger_filter(&self) -> bool {
        false
    }

    hooks!(OnJobEnter);
}

impl OnJobEnter for Credentials {
    fn on_job_enter(&mut self, job: &Job, sink: &mut Sink) {
        if let Some(container) = &job.container {
            check_container(container, "\"container\" section", sink);
        }

        for (id, service) in &job.services {
            check_container(service, &format!("\"{id}\" service"), sink);
        }
    }
}

fn check_container(container: &Container, section: &str, sink: &mut Sink) {
    let Some(password) = container
        .credentials
        .as_ref()
        .and_then(|creds| creds.password.as_ref())
    else {
        return;
    };

    if password.as_str().is_empty() || password.has_expression() {
        return;
    }

    sink.report(
        password.position,
        format!(
            "\"password\" section in {section} has hard-coded password. use secrets for credentials"
        ),
    );
}
