//! Static entity schema registry.
//!
//! One tagged definition per entity: scalar fields, belongs-to relations,
//! reverse (has-many) relations, search-term keys and the path from a row to
//! its tenant. The query translator, the authorization scoper and the request
//! dispatcher all consume these definitions instead of carrying per-entity
//! code.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Date,
    Timestamp,
    Uuid,
}

#[derive(Debug)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

/// Foreign-key relation to a parent entity. `name` is the key used when the
/// parent row is embedded in a response.
#[derive(Debug)]
pub struct BelongsTo {
    pub name: &'static str,
    pub fk: &'static str,
    pub entity: &'static str,
}

/// Reverse relation. `fk` is the column on the child table pointing back here.
#[derive(Debug)]
pub struct HasMany {
    pub name: &'static str,
    pub fk: &'static str,
    pub entity: &'static str,
}

/// How a row reaches its tenant. Entities without their own `tenant_id`
/// column are scoped through the owning organization or user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantPath {
    Direct,
    ViaOrganization,
    ViaUser,
}

#[derive(Debug)]
pub struct EntityDef {
    /// Singular entity name, also the table name
    pub name: &'static str,
    /// Plural route segment, e.g. `insurance-providers`
    pub route: &'static str,
    pub table: &'static str,
    pub fields: &'static [FieldDef],
    pub belongs_to: &'static [BelongsTo],
    pub has_many: &'static [HasMany],
    /// Columns matched OR-wise by a `searchTerm` query parameter
    pub search_keys: &'static [&'static str],
    pub tenant_path: TenantPath,
}

/// A named relation, either direction.
#[derive(Debug, Clone, Copy)]
pub enum Relation {
    Parent(&'static BelongsTo),
    Children(&'static HasMany),
}

impl EntityDef {
    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Kind of any filterable/orderable column, including the server-assigned
    /// ones that are not part of the writable field set.
    pub fn column_kind(&self, name: &str) -> Option<FieldKind> {
        match name {
            "id" => Some(FieldKind::Uuid),
            "created_at" | "updated_at" => Some(FieldKind::Timestamp),
            "tenant_id" if self.tenant_path == TenantPath::Direct => Some(FieldKind::Text),
            _ => self.field(name).map(|f| f.kind),
        }
    }

    pub fn relation(&self, name: &str) -> Option<Relation> {
        if let Some(bt) = self.belongs_to.iter().find(|b| b.name == name) {
            return Some(Relation::Parent(bt));
        }
        self.has_many
            .iter()
            .find(|h| h.name == name)
            .map(Relation::Children)
    }

    pub fn belongs_to_for_fk(&self, fk: &str) -> Option<&'static BelongsTo> {
        self.belongs_to.iter().find(|b| b.fk == fk)
    }
}

static APPOINTMENT: EntityDef = EntityDef {
    name: "appointment",
    route: "appointments",
    table: "appointment",
    fields: &[
        FieldDef { name: "date", kind: FieldKind::Date, required: true },
        FieldDef { name: "start_time", kind: FieldKind::Timestamp, required: true },
        FieldDef { name: "end_time", kind: FieldKind::Timestamp, required: true },
        FieldDef { name: "status", kind: FieldKind::Text, required: true },
        FieldDef { name: "patient_id", kind: FieldKind::Uuid, required: true },
        FieldDef { name: "doctor_id", kind: FieldKind::Uuid, required: true },
        FieldDef { name: "organization_id", kind: FieldKind::Uuid, required: true },
    ],
    belongs_to: &[
        BelongsTo { name: "guest", fk: "patient_id", entity: "guest" },
        BelongsTo { name: "medical_staff", fk: "doctor_id", entity: "medical_staff" },
        BelongsTo { name: "organization", fk: "organization_id", entity: "organization" },
    ],
    has_many: &[],
    search_keys: &["status"],
    tenant_path: TenantPath::ViaOrganization,
};

static GUEST: EntityDef = EntityDef {
    name: "guest",
    route: "guests",
    table: "guest",
    fields: &[
        FieldDef { name: "date_of_birth", kind: FieldKind::Date, required: true },
        FieldDef { name: "gender", kind: FieldKind::Text, required: true },
        FieldDef { name: "phone_number", kind: FieldKind::Text, required: true },
        FieldDef { name: "address", kind: FieldKind::Text, required: true },
        FieldDef { name: "city", kind: FieldKind::Text, required: true },
        FieldDef { name: "state", kind: FieldKind::Text, required: true },
        FieldDef { name: "zip_code", kind: FieldKind::Text, required: true },
        FieldDef { name: "country", kind: FieldKind::Text, required: true },
        FieldDef { name: "user_id", kind: FieldKind::Uuid, required: true },
    ],
    belongs_to: &[BelongsTo { name: "user", fk: "user_id", entity: "user" }],
    has_many: &[HasMany { name: "appointment", fk: "patient_id", entity: "appointment" }],
    search_keys: &["phone_number", "city", "country"],
    tenant_path: TenantPath::ViaUser,
};

static ORGANIZATION: EntityDef = EntityDef {
    name: "organization",
    route: "organizations",
    table: "organization",
    fields: &[
        FieldDef { name: "name", kind: FieldKind::Text, required: true },
        FieldDef { name: "description", kind: FieldKind::Text, required: false },
        FieldDef { name: "address", kind: FieldKind::Text, required: false },
        FieldDef { name: "city", kind: FieldKind::Text, required: false },
        FieldDef { name: "state", kind: FieldKind::Text, required: false },
        FieldDef { name: "zip_code", kind: FieldKind::Text, required: false },
        FieldDef { name: "country", kind: FieldKind::Text, required: false },
        FieldDef { name: "user_id", kind: FieldKind::Uuid, required: true },
    ],
    belongs_to: &[BelongsTo { name: "user", fk: "user_id", entity: "user" }],
    has_many: &[
        HasMany { name: "appointment", fk: "organization_id", entity: "appointment" },
        HasMany { name: "insurance_provider", fk: "organization_id", entity: "insurance_provider" },
        HasMany { name: "medical_staff", fk: "organization_id", entity: "medical_staff" },
    ],
    search_keys: &["name", "city"],
    tenant_path: TenantPath::Direct,
};

static MEDICAL_STAFF: EntityDef = EntityDef {
    name: "medical_staff",
    route: "medical-staffs",
    table: "medical_staff",
    fields: &[
        FieldDef { name: "specialty", kind: FieldKind::Text, required: true },
        FieldDef { name: "license_number", kind: FieldKind::Text, required: true },
        FieldDef { name: "user_id", kind: FieldKind::Uuid, required: true },
        FieldDef { name: "organization_id", kind: FieldKind::Uuid, required: true },
    ],
    belongs_to: &[
        BelongsTo { name: "user", fk: "user_id", entity: "user" },
        BelongsTo { name: "organization", fk: "organization_id", entity: "organization" },
    ],
    has_many: &[HasMany { name: "appointment", fk: "doctor_id", entity: "appointment" }],
    search_keys: &["specialty", "license_number"],
    tenant_path: TenantPath::ViaOrganization,
};

static INSURANCE_PROVIDER: EntityDef = EntityDef {
    name: "insurance_provider",
    route: "insurance-providers",
    table: "insurance_provider",
    fields: &[
        FieldDef { name: "company_name", kind: FieldKind::Text, required: true },
        FieldDef { name: "policy_number", kind: FieldKind::Text, required: true },
        FieldDef { name: "coverage_start_date", kind: FieldKind::Date, required: true },
        FieldDef { name: "coverage_end_date", kind: FieldKind::Date, required: true },
        FieldDef { name: "user_id", kind: FieldKind::Uuid, required: true },
        FieldDef { name: "organization_id", kind: FieldKind::Uuid, required: true },
    ],
    belongs_to: &[
        BelongsTo { name: "user", fk: "user_id", entity: "user" },
        BelongsTo { name: "organization", fk: "organization_id", entity: "organization" },
    ],
    has_many: &[],
    search_keys: &["company_name", "policy_number"],
    tenant_path: TenantPath::ViaOrganization,
};

static USER: EntityDef = EntityDef {
    name: "user",
    route: "users",
    table: "user",
    fields: &[
        FieldDef { name: "email", kind: FieldKind::Text, required: true },
        FieldDef { name: "first_name", kind: FieldKind::Text, required: false },
        FieldDef { name: "last_name", kind: FieldKind::Text, required: false },
    ],
    belongs_to: &[],
    has_many: &[],
    search_keys: &["email"],
    tenant_path: TenantPath::Direct,
};

pub static ENTITIES: &[&EntityDef] = &[
    &APPOINTMENT,
    &GUEST,
    &ORGANIZATION,
    &MEDICAL_STAFF,
    &INSURANCE_PROVIDER,
    &USER,
];

/// Resolve an entity from its plural route segment.
pub fn by_route(route: &str) -> Option<&'static EntityDef> {
    ENTITIES.iter().copied().find(|e| e.route == route)
}

/// Resolve an entity from its singular name.
pub fn by_name(name: &str) -> Option<&'static EntityDef> {
    ENTITIES.iter().copied().find(|e| e.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_hyphenated_routes() {
        assert_eq!(by_route("insurance-providers").unwrap().name, "insurance_provider");
        assert_eq!(by_route("medical-staffs").unwrap().name, "medical_staff");
        assert!(by_route("invoices").is_none());
    }

    #[test]
    fn every_relation_target_exists() {
        for def in ENTITIES {
            for bt in def.belongs_to {
                assert!(by_name(bt.entity).is_some(), "{} -> {}", def.name, bt.entity);
            }
            for hm in def.has_many {
                assert!(by_name(hm.entity).is_some(), "{} -> {}", def.name, hm.entity);
            }
        }
    }

    #[test]
    fn column_kind_covers_system_columns() {
        let def = by_name("appointment").unwrap();
        assert_eq!(def.column_kind("id"), Some(FieldKind::Uuid));
        assert_eq!(def.column_kind("created_at"), Some(FieldKind::Timestamp));
        assert_eq!(def.column_kind("status"), Some(FieldKind::Text));
        // appointment is tenanted via organization, so it has no tenant_id column
        assert_eq!(def.column_kind("tenant_id"), None);
        assert_eq!(by_name("organization").unwrap().column_kind("tenant_id"), Some(FieldKind::Text));
    }

    #[test]
    fn relation_lookup_both_directions() {
        let def = by_name("organization").unwrap();
        assert!(matches!(def.relation("user"), Some(Relation::Parent(_))));
        assert!(matches!(def.relation("medical_staff"), Some(Relation::Children(_))));
        assert!(def.relation("invoice").is_none());
    }
}
