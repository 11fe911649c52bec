//! Built-in workflow templates
//!
//! Templates are immutable step lists. A workflow created from one gets
//! fresh step ids, the template id as a tag, and starts `ready` when a
//! target is supplied (`draft` otherwise).

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{OpflowError, Result};

use super::step::{ModuleKind, StepSpec};
use super::workflow::{Target, Workflow, WorkflowSpec, WorkflowStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub steps: Vec<StepSpec>,
}

/// Listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub step_count: usize,
}

/// Input for `create_from_template`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateRequest {
    /// Overrides the template name
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub target: Target,
}

impl Template {
    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            id: self.id.to_string(),
            name: self.name.to_string(),
            description: self.description.to_string(),
            step_count: self.steps.len(),
        }
    }

    /// Build a new workflow document from this template
    pub fn instantiate(&self, request: TemplateRequest) -> Result<Workflow> {
        let name = request
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.name.to_string());
        let ready = !request.target.is_empty();

        let mut workflow = Workflow::from_spec(WorkflowSpec {
            name,
            description: self.description.to_string(),
            tags: BTreeSet::from([self.id.to_string()]),
            target: request.target,
            steps: self.steps.clone(),
        })?;
        workflow.template_id = Some(self.id.to_string());
        if ready {
            workflow.status = WorkflowStatus::Ready;
        }
        Ok(workflow)
    }
}

static CATALOG: Lazy<Vec<Template>> = Lazy::new(|| {
    vec![
        Template {
            id: "windows_post_exploit",
            name: "Windows Post-Exploitation",
            description: "Standard Windows post-exploitation workflow",
            steps: vec![
                StepSpec::command("Get System Info", "sysinfo"),
                StepSpec::command("Get User ID", "getuid"),
                StepSpec::command("Get Privileges", "getprivs"),
                StepSpec::module(ModuleKind::Post, "Hashdump", "windows/gather/hashdump"),
                StepSpec::module(
                    ModuleKind::Post,
                    "Enumerate Domain",
                    "windows/gather/enum_domain",
                ),
            ],
        },
        Template {
            id: "linux_post_exploit",
            name: "Linux Post-Exploitation",
            description: "Standard Linux post-exploitation workflow",
            steps: vec![
                StepSpec::command("Get System Info", "sysinfo"),
                StepSpec::command("Get User ID", "getuid"),
                StepSpec::module(
                    ModuleKind::Post,
                    "Enumerate Users",
                    "linux/gather/enum_users_history",
                ),
                StepSpec::module(ModuleKind::Post, "Check VM", "linux/gather/checkvm"),
            ],
        },
        Template {
            id: "privilege_escalation",
            name: "Privilege Escalation",
            description: "Attempt privilege escalation",
            steps: vec![
                StepSpec::command("Check Current Privs", "getuid"),
                StepSpec::command("Try GetSystem", "getsystem").continue_on_fail(),
                StepSpec::module(
                    ModuleKind::Post,
                    "Suggest Exploits",
                    "multi/recon/local_exploit_suggester",
                ),
            ],
        },
        Template {
            id: "credential_harvest",
            name: "Credential Harvesting",
            description: "Gather credentials from target",
            steps: vec![
                StepSpec::module(ModuleKind::Post, "Hashdump", "windows/gather/hashdump")
                    .continue_on_fail(),
                StepSpec::module(ModuleKind::Post, "Cached Creds", "windows/gather/cachedump")
                    .continue_on_fail(),
                StepSpec::module(ModuleKind::Post, "LSA Secrets", "windows/gather/lsa_secrets")
                    .continue_on_fail(),
            ],
        },
        Template {
            id: "persistence",
            name: "Establish Persistence",
            description: "Set up persistence mechanisms",
            steps: vec![
                StepSpec::module(
                    ModuleKind::Post,
                    "Registry Persistence",
                    "windows/manage/persistence_exe",
                )
                .continue_on_fail(),
                StepSpec::module(ModuleKind::Post, "Scheduled Task", "windows/manage/schtasks")
                    .continue_on_fail(),
            ],
        },
    ]
});

/// All built-in templates, in catalog order
pub fn templates() -> &'static [Template] {
    &CATALOG
}

pub fn find_template(id: &str) -> Result<&'static Template> {
    CATALOG
        .iter()
        .find(|t| t.id == id)
        .ok_or_else(|| OpflowError::TemplateNotFound { id: id.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::step::Step;

    #[test]
    fn catalog_has_five_templates() {
        let ids: Vec<_> = templates().iter().map(|t| t.id).collect();
        assert_eq!(
            ids,
            [
                "windows_post_exploit",
                "linux_post_exploit",
                "privilege_escalation",
                "credential_harvest",
                "persistence"
            ]
        );
    }

    #[test]
    fn every_template_step_validates() {
        for template in templates() {
            for (i, spec) in template.steps.iter().cloned().enumerate() {
                Step::from_spec(i, spec)
                    .unwrap_or_else(|e| panic!("{} step {} invalid: {}", template.id, i, e));
            }
        }
    }

    #[test]
    fn unknown_template_is_not_found() {
        let err = find_template("ransomware").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.code(), "OPF-021");
    }

    #[test]
    fn instantiate_with_target_is_ready() {
        let template = find_template("privilege_escalation").unwrap();
        let wf = template
            .instantiate(TemplateRequest {
                name: None,
                target: Target::session(4),
            })
            .unwrap();
        assert_eq!(wf.status, WorkflowStatus::Ready);
        assert_eq!(wf.name, "Privilege Escalation");
        assert_eq!(wf.template_id.as_deref(), Some("privilege_escalation"));
        assert!(wf.tags.contains("privilege_escalation"));
        assert!(wf.steps[1].continue_on_fail);
    }

    #[test]
    fn instantiate_without_target_is_draft() {
        let template = find_template("persistence").unwrap();
        let wf = template
            .instantiate(TemplateRequest {
                name: Some("Keep access".into()),
                target: Target::default(),
            })
            .unwrap();
        assert_eq!(wf.status, WorkflowStatus::Draft);
        assert_eq!(wf.name, "Keep access");
    }

    #[test]
    fn two_instances_never_share_step_ids() {
        let template = find_template("linux_post_exploit").unwrap();
        let a = template.instantiate(TemplateRequest::default()).unwrap();
        let b = template.instantiate(TemplateRequest::default()).unwrap();
        assert_ne!(a.steps[0].id, b.steps[0].id);
    }
}
