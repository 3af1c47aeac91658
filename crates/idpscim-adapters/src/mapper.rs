//! Conversions between directory records, the reconciler model and SCIM bodies.

use idpscim_core::{
    Address, Email, EnterpriseData, Group, Manager, Member, Name, PhoneNumber, Resource, User,
};

use crate::google::{DirectoryGroup, DirectoryMember, DirectoryOrganization, DirectoryUser};
use crate::scim::{
    ScimAddress, ScimEmail, ScimEnterpriseUser, ScimGroupBody, ScimManager, ScimName,
    ScimPhoneNumber, ScimResource, ScimUserBody, ENTERPRISE_USER_SCHEMA, GROUP_SCHEMA, USER_SCHEMA,
};
use crate::{DirectoryError, TargetResource};

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn group_from_directory(raw: &DirectoryGroup) -> Result<Group, DirectoryError> {
    if raw.id.trim().is_empty() {
        return Err(DirectoryError::Invalid("group without id".into()));
    }
    let display_name = if raw.name.trim().is_empty() {
        raw.email.clone().unwrap_or_else(|| raw.id.clone())
    } else {
        raw.name.clone()
    };
    Ok(Group::new(raw.id.clone(), display_name, non_empty(raw.email.as_ref())))
}

pub fn member_from_directory(raw: &DirectoryMember) -> Result<Member, DirectoryError> {
    if raw.id.trim().is_empty() {
        return Err(DirectoryError::Invalid("group member without id".into()));
    }
    let user_name = non_empty(raw.email.as_ref())
        .ok_or_else(|| DirectoryError::Invalid(format!("group member {} has no email", raw.id)))?;
    Ok(Member {
        ipid: raw.id.clone(),
        scimid: String::new(),
        user_name,
    })
}

fn user_name_parts(raw: &DirectoryUser) -> Option<Name> {
    let name = raw.name.as_ref()?;
    let parsed = Name {
        formatted: non_empty(name.full_name.as_ref()),
        family_name: non_empty(name.family_name.as_ref()),
        given_name: non_empty(name.given_name.as_ref()),
        ..Name::default()
    };
    (parsed != Name::default()).then_some(parsed)
}

fn user_display_name(raw: &DirectoryUser) -> String {
    let name = raw.name.clone().unwrap_or_default();
    if let Some(display) = non_empty(name.display_name.as_ref()) {
        return display;
    }
    if let Some(full) = non_empty(name.full_name.as_ref()) {
        return full;
    }
    let joined = [name.given_name, name.family_name]
        .into_iter()
        .flatten()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        raw.primary_email.clone()
    } else {
        joined
    }
}

/// The directory's `primaryEmail` is authoritative; every other address is secondary.
fn user_emails(raw: &DirectoryUser) -> Vec<Email> {
    let primary_kind = raw
        .emails
        .iter()
        .find(|e| e.address.eq_ignore_ascii_case(&raw.primary_email))
        .and_then(|e| e.kind.clone())
        .or_else(|| Some("work".to_string()));

    let mut emails = vec![Email {
        value: raw.primary_email.clone(),
        kind: primary_kind,
        primary: true,
    }];
    for email in &raw.emails {
        if email.address.eq_ignore_ascii_case(&raw.primary_email)
            || emails.iter().any(|e| e.value.eq_ignore_ascii_case(&email.address))
        {
            continue;
        }
        emails.push(Email::secondary(email.address.clone(), email.kind.clone()));
    }
    emails
}

fn primary_organization(raw: &DirectoryUser) -> Option<&DirectoryOrganization> {
    raw.organizations
        .iter()
        .find(|org| org.primary)
        .or_else(|| raw.organizations.first())
}

fn user_enterprise(raw: &DirectoryUser) -> Option<EnterpriseData> {
    let org = primary_organization(raw).cloned().unwrap_or_default();
    let employee_number = raw
        .external_ids
        .iter()
        .find(|id| id.kind.as_deref() == Some("organization"))
        .and_then(|id| non_empty(Some(&id.value)));
    let manager = raw
        .relations
        .iter()
        .find(|rel| rel.kind.as_deref() == Some("manager"))
        .and_then(|rel| non_empty(Some(&rel.value)))
        .map(|value| Manager {
            value,
            reference: None,
        });

    let data = EnterpriseData {
        employee_number,
        cost_center: non_empty(org.cost_center.as_ref()),
        organization: non_empty(org.name.as_ref()),
        division: non_empty(org.description.as_ref()),
        department: non_empty(org.department.as_ref()),
        manager,
    };
    (!data.is_empty()).then_some(data)
}

pub fn user_from_directory(raw: &DirectoryUser) -> Result<User, DirectoryError> {
    if raw.id.trim().is_empty() {
        return Err(DirectoryError::Invalid("user without id".into()));
    }
    if raw.primary_email.trim().is_empty() {
        return Err(DirectoryError::Invalid(format!(
            "user {} has no primary email",
            raw.id
        )));
    }

    let mut user = User::new(
        raw.id.clone(),
        raw.primary_email.clone(),
        user_display_name(raw),
        !raw.suspended,
        user_emails(raw),
    );
    user.name = user_name_parts(raw);
    user.addresses = raw
        .addresses
        .iter()
        .map(|a| Address {
            formatted: non_empty(a.formatted.as_ref()),
            street_address: non_empty(a.street_address.as_ref()),
            locality: non_empty(a.locality.as_ref()),
            region: non_empty(a.region.as_ref()),
            postal_code: non_empty(a.postal_code.as_ref()),
            country: non_empty(a.country.as_ref()),
            kind: non_empty(a.kind.as_ref()),
            primary: a.primary,
        })
        .collect();
    user.phone_numbers = raw
        .phones
        .iter()
        .filter(|p| !p.value.trim().is_empty())
        .map(|p| PhoneNumber {
            value: p.value.clone(),
            kind: p.kind.clone(),
        })
        .collect();
    user.title = primary_organization(raw).and_then(|org| non_empty(org.title.as_ref()));
    user.enterprise = user_enterprise(raw);
    user.refresh_fingerprint();
    Ok(user)
}

pub fn scim_group_body(group: &Group) -> ScimGroupBody {
    ScimGroupBody {
        schemas: vec![GROUP_SCHEMA.to_string()],
        external_id: group.ipid.clone(),
        display_name: group.display_name.clone(),
    }
}

pub fn scim_user_body(user: &User) -> ScimUserBody {
    let mut schemas = vec![USER_SCHEMA.to_string()];
    let enterprise = user.enterprise.as_ref().map(|e| ScimEnterpriseUser {
        employee_number: e.employee_number.clone(),
        cost_center: e.cost_center.clone(),
        organization: e.organization.clone(),
        division: e.division.clone(),
        department: e.department.clone(),
        manager: e.manager.as_ref().map(|m| ScimManager {
            value: m.value.clone(),
            reference: m.reference.clone(),
        }),
    });
    if enterprise.is_some() {
        schemas.push(ENTERPRISE_USER_SCHEMA.to_string());
    }

    ScimUserBody {
        schemas,
        id: (!user.scimid.is_empty()).then(|| user.scimid.clone()),
        external_id: user.ipid.clone(),
        user_name: user.user_name.clone(),
        display_name: user.display_name.clone(),
        active: user.active,
        name: user.name.as_ref().map(|n| ScimName {
            formatted: n.formatted.clone(),
            family_name: n.family_name.clone(),
            given_name: n.given_name.clone(),
            middle_name: n.middle_name.clone(),
            honorific_prefix: n.honorific_prefix.clone(),
            honorific_suffix: n.honorific_suffix.clone(),
        }),
        emails: user
            .emails
            .iter()
            .map(|e| ScimEmail {
                value: e.value.clone(),
                kind: e.kind.clone(),
                primary: e.primary,
            })
            .collect(),
        addresses: user
            .addresses
            .iter()
            .map(|a| ScimAddress {
                formatted: a.formatted.clone(),
                street_address: a.street_address.clone(),
                locality: a.locality.clone(),
                region: a.region.clone(),
                postal_code: a.postal_code.clone(),
                country: a.country.clone(),
                kind: a.kind.clone(),
                primary: a.primary,
            })
            .collect(),
        phone_numbers: user
            .phone_numbers
            .iter()
            .map(|p| ScimPhoneNumber {
                value: p.value.clone(),
                kind: p.kind.clone(),
            })
            .collect(),
        title: user.title.clone(),
        enterprise,
    }
}

/// Resources without an id cannot be addressed and are dropped.
pub fn target_from_scim(resource: ScimResource, name: Option<String>) -> Option<TargetResource> {
    let scimid = resource.id.filter(|id| !id.is_empty())?;
    Some(TargetResource {
        scimid,
        external_id: resource.external_id.filter(|id| !id.is_empty()),
        name: name.unwrap_or_default(),
    })
}
