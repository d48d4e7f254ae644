use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::Directory;
use crate::types::Site;

/// Fixed role enumeration. Wire names match the stored strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "BIM")]
    Bim,
    #[serde(rename = "ME")]
    Me,
    #[serde(rename = "SN")]
    Sn,
    #[serde(rename = "SITE_ADMIN")]
    SiteAdmin,
    #[serde(rename = "ADMIN_SITE_2")]
    AdminSite2,
    #[serde(rename = "OE")]
    Oe,
    #[serde(rename = "PE")]
    Pe,
    #[serde(rename = "CM")]
    Cm,
    #[serde(rename = "PD")]
    Pd,
    #[serde(rename = "PM")]
    Pm,
    #[serde(rename = "SE")]
    Se,
    #[serde(rename = "ADMIN")]
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Bim => "BIM",
            Role::Me => "ME",
            Role::Sn => "SN",
            Role::SiteAdmin => "SITE_ADMIN",
            Role::AdminSite2 => "ADMIN_SITE_2",
            Role::Oe => "OE",
            Role::Pe => "PE",
            Role::Cm => "CM",
            Role::Pd => "PD",
            Role::Pm => "PM",
            Role::Se => "SE",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "BIM" => Some(Role::Bim),
            "ME" => Some(Role::Me),
            "SN" => Some(Role::Sn),
            "SITE_ADMIN" => Some(Role::SiteAdmin),
            "ADMIN_SITE_2" => Some(Role::AdminSite2),
            "OE" => Some(Role::Oe),
            "PE" => Some(Role::Pe),
            "CM" => Some(Role::Cm),
            "PD" => Some(Role::Pd),
            "PM" => Some(Role::Pm),
            "SE" => Some(Role::Se),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Functional area subject to permissioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Module {
    #[serde(rename = "RFA")]
    Rfa,
    #[serde(rename = "WORK_REQUEST")]
    WorkRequest,
}

impl Module {
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Rfa => "RFA",
            Module::WorkRequest => "WORK_REQUEST",
        }
    }

    pub fn parse(s: &str) -> Option<Module> {
        match s {
            "RFA" => Some(Module::Rfa),
            "WORK_REQUEST" => Some(Module::WorkRequest),
            _ => None,
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named capability within a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "create_shop")]
    CreateShop,
    #[serde(rename = "create_gen")]
    CreateGen,
    #[serde(rename = "create_mat")]
    CreateMat,
    #[serde(rename = "review")]
    Review,
    #[serde(rename = "approve")]
    Approve,
    #[serde(rename = "create")]
    Create,
    #[serde(rename = "approve_draft")]
    ApproveDraft,
    #[serde(rename = "execute")]
    Execute,
    #[serde(rename = "inspect")]
    Inspect,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateShop => "create_shop",
            Action::CreateGen => "create_gen",
            Action::CreateMat => "create_mat",
            Action::Review => "review",
            Action::Approve => "approve",
            Action::Create => "create",
            Action::ApproveDraft => "approve_draft",
            Action::Execute => "execute",
            Action::Inspect => "inspect",
        }
    }

    pub fn parse(s: &str) -> Option<Action> {
        match s {
            "create_shop" => Some(Action::CreateShop),
            "create_gen" => Some(Action::CreateGen),
            "create_mat" => Some(Action::CreateMat),
            "review" => Some(Action::Review),
            "approve" => Some(Action::Approve),
            "create" => Some(Action::Create),
            "approve_draft" => Some(Action::ApproveDraft),
            "execute" => Some(Action::Execute),
            "inspect" => Some(Action::Inspect),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled-in fallback policy, used when a site carries no roleSettings
/// entry for the (module, action) pair. Returns None for pairs that do not
/// exist, which the resolver treats as a configuration error and denies.
pub fn default_allowed(module: Module, action: Action) -> Option<&'static [Role]> {
    use Role::*;
    match (module, action) {
        (Module::Rfa, Action::CreateShop) => Some(&[Bim, SiteAdmin, AdminSite2]),
        (Module::Rfa, Action::CreateGen) => Some(&[Me, SiteAdmin, AdminSite2]),
        (Module::Rfa, Action::CreateMat) => Some(&[Me, Sn, SiteAdmin, AdminSite2]),
        (Module::Rfa, Action::Review) => Some(&[Oe, Pe, Se]),
        (Module::Rfa, Action::Approve) => Some(&[Cm]),
        (Module::WorkRequest, Action::Create) => Some(&[Bim, Me, Sn, SiteAdmin, AdminSite2]),
        (Module::WorkRequest, Action::ApproveDraft) => Some(&[Oe, Pe]),
        (Module::WorkRequest, Action::Execute) => Some(&[Se, Pm]),
        (Module::WorkRequest, Action::Inspect) => Some(&[Oe, Pe, Cm]),
        _ => None,
    }
}

/// One permission question: may `user_id` acting as `role` perform
/// `module`/`action` on this site? `site` is None when the site document
/// could not be read, which must resolve to deny.
pub struct PermissionRequest<'a> {
    pub site: Option<&'a Site>,
    pub user_id: &'a str,
    pub role: Role,
    pub module: Module,
    pub action: Action,
}

/// A policy layer answers Some(decision) when it has jurisdiction and None
/// to defer to the next layer.
type PolicyLayer = fn(&PermissionRequest<'_>) -> Option<bool>;

fn admin_bypass(req: &PermissionRequest<'_>) -> Option<bool> {
    (req.role == Role::Admin).then_some(true)
}

// Missing site document denies everything below the Admin bypass.
fn site_guard(req: &PermissionRequest<'_>) -> Option<bool> {
    req.site.is_none().then_some(false)
}

fn user_override(req: &PermissionRequest<'_>) -> Option<bool> {
    let site = req.site?;
    site.user_overrides
        .as_ref()?
        .get(req.user_id)?
        .get(&req.module)?
        .get(&req.action)
        .copied()
}

fn site_policy(req: &PermissionRequest<'_>) -> Option<bool> {
    let site = req.site?;
    let allowed = site
        .role_settings
        .as_ref()?
        .get(&req.module)?
        .get(&req.action)?;
    Some(allowed.contains(&req.role))
}

fn default_policy(req: &PermissionRequest<'_>) -> Option<bool> {
    match default_allowed(req.module, req.action) {
        Some(roles) => Some(roles.contains(&req.role)),
        None => {
            tracing::warn!(
                "No default policy entry for {}/{} - denying (check module/action wiring)",
                req.module,
                req.action
            );
            Some(false)
        }
    }
}

/// Ordered strategy chain, first Some wins. Adding a policy layer is a
/// pure extension of this table.
const POLICY_CHAIN: &[(&str, PolicyLayer)] = &[
    ("admin_bypass", admin_bypass),
    ("site_guard", site_guard),
    ("user_override", user_override),
    ("site_policy", site_policy),
    ("default_policy", default_policy),
];

/// Resolve one permission question. Read-only, never fails: any gap in the
/// data lands on a deny.
pub fn resolve(req: &PermissionRequest<'_>) -> bool {
    for (name, layer) in POLICY_CHAIN {
        if let Some(decision) = layer(req) {
            tracing::debug!(
                "Permission {}/{} for {} ({}): {} via {}",
                req.module,
                req.action,
                req.user_id,
                req.role,
                decision,
                name
            );
            return decision;
        }
    }
    false
}

/// Fetch the site once and resolve. Store failures resolve to deny rather
/// than propagating - permission checks fail closed.
pub async fn check(
    directory: &dyn Directory,
    site_id: &str,
    user_id: &str,
    role: Role,
    module: Module,
    action: Action,
) -> bool {
    let site = match directory.get_site(site_id).await {
        Ok(site) => site,
        Err(e) => {
            tracing::warn!("Site lookup failed for {}: {} - denying", site_id, e);
            None
        }
    };
    resolve(&PermissionRequest {
        site: site.as_ref(),
        user_id,
        role,
        module,
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn bare_site() -> Site {
        Site {
            site_id: "site-1".to_string(),
            name: "North Tower".to_string(),
            role_settings: None,
            user_overrides: None,
        }
    }

    fn request<'a>(site: Option<&'a Site>, user_id: &'a str, role: Role, module: Module, action: Action) -> PermissionRequest<'a> {
        PermissionRequest { site, user_id, role, module, action }
    }

    #[test]
    fn default_list_applies_without_site_settings() {
        let site = bare_site();

        // BIM is on the default create_shop list but not the approve list
        assert!(resolve(&request(Some(&site), "u1", Role::Bim, Module::Rfa, Action::CreateShop)));
        assert!(!resolve(&request(Some(&site), "u1", Role::Bim, Module::Rfa, Action::Approve)));
    }

    #[test]
    fn missing_site_denies_everything_but_admin() {
        assert!(!resolve(&request(None, "u1", Role::Cm, Module::Rfa, Action::Approve)));
        assert!(resolve(&request(None, "u1", Role::Admin, Module::Rfa, Action::Approve)));
    }

    #[test]
    fn override_beats_role_policy_in_both_directions() {
        let mut site = bare_site();
        let mut grants = HashMap::new();
        grants.insert(Module::Rfa, HashMap::from([(Action::Approve, true)]));
        let mut revokes = HashMap::new();
        revokes.insert(Module::Rfa, HashMap::from([(Action::Approve, false)]));
        site.user_overrides = Some(HashMap::from([
            ("u1".to_string(), grants),
            ("u2".to_string(), revokes),
        ]));

        // PE is not on any approve list, but the override grants it
        assert!(resolve(&request(Some(&site), "u1", Role::Pe, Module::Rfa, Action::Approve)));
        // CM is on the default approve list, but the override revokes it
        assert!(!resolve(&request(Some(&site), "u2", Role::Cm, Module::Rfa, Action::Approve)));
        // Overrides only affect the named user
        assert!(resolve(&request(Some(&site), "u3", Role::Cm, Module::Rfa, Action::Approve)));
    }

    #[test]
    fn admin_bypass_beats_override() {
        let mut site = bare_site();
        let mut revokes = HashMap::new();
        revokes.insert(Module::Rfa, HashMap::from([(Action::Approve, false)]));
        site.user_overrides = Some(HashMap::from([("admin-1".to_string(), revokes)]));

        assert!(resolve(&request(Some(&site), "admin-1", Role::Admin, Module::Rfa, Action::Approve)));
    }

    #[test]
    fn site_policy_beats_defaults() {
        let mut site = bare_site();
        site.role_settings = Some(HashMap::from([(
            Module::Rfa,
            HashMap::from([(Action::Approve, vec![Role::Pd])]),
        )]));

        // Site policy replaces the default list entirely for that action
        assert!(resolve(&request(Some(&site), "u1", Role::Pd, Module::Rfa, Action::Approve)));
        assert!(!resolve(&request(Some(&site), "u1", Role::Cm, Module::Rfa, Action::Approve)));
        // Other actions still fall through to the defaults
        assert!(resolve(&request(Some(&site), "u1", Role::Bim, Module::Rfa, Action::CreateShop)));
    }

    #[test]
    fn unknown_module_action_pair_denies() {
        let site = bare_site();
        // "review" is not a WORK_REQUEST action, so there is no default entry
        assert!(!resolve(&request(Some(&site), "u1", Role::Cm, Module::WorkRequest, Action::Review)));
    }

    #[test]
    fn every_default_entry_is_consistent_with_its_module() {
        // RFA actions never leak into the WORK_REQUEST defaults and vice versa
        for action in [Action::CreateShop, Action::CreateGen, Action::CreateMat, Action::Review, Action::Approve] {
            assert!(default_allowed(Module::WorkRequest, action).is_none());
        }
        for action in [Action::Create, Action::ApproveDraft, Action::Execute, Action::Inspect] {
            assert!(default_allowed(Module::Rfa, action).is_none());
        }
    }

    #[test]
    fn role_strings_round_trip() {
        for role in [
            Role::Bim, Role::Me, Role::Sn, Role::SiteAdmin, Role::AdminSite2,
            Role::Oe, Role::Pe, Role::Cm, Role::Pd, Role::Pm, Role::Se, Role::Admin,
        ] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("FOREMAN"), None);
    }
}
