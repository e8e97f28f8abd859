use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// Reference catalogs downloaded from the server, in the order they are synced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Empresas,
    Campos,
    Temporadas,
    Ciclos,
    Cultivos,
    Variedades,
    Lotes,
    Articulos,
    Familias,
    Almacenes,
    Maquinaria,
    Implementos,
    Pluviometros,
    LineasRiego,
    TiposDano,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 15] = [
        CatalogKind::Empresas,
        CatalogKind::Campos,
        CatalogKind::Temporadas,
        CatalogKind::Ciclos,
        CatalogKind::Cultivos,
        CatalogKind::Variedades,
        CatalogKind::Lotes,
        CatalogKind::Articulos,
        CatalogKind::Familias,
        CatalogKind::Almacenes,
        CatalogKind::Maquinaria,
        CatalogKind::Implementos,
        CatalogKind::Pluviometros,
        CatalogKind::LineasRiego,
        CatalogKind::TiposDano,
    ];

    /// Name shown in progress lists.
    pub fn display_name(self) -> &'static str {
        match self {
            CatalogKind::Empresas => "Empresas",
            CatalogKind::Campos => "Campos",
            CatalogKind::Temporadas => "Temporadas",
            CatalogKind::Ciclos => "Ciclos",
            CatalogKind::Cultivos => "Cultivos",
            CatalogKind::Variedades => "Variedades",
            CatalogKind::Lotes => "Lotes",
            CatalogKind::Articulos => "Articulos",
            CatalogKind::Familias => "Familias",
            CatalogKind::Almacenes => "Almacenes",
            CatalogKind::Maquinaria => "Maquinaria",
            CatalogKind::Implementos => "Implementos",
            CatalogKind::Pluviometros => "Pluviometros",
            CatalogKind::LineasRiego => "Lineas de riego",
            CatalogKind::TiposDano => "Tipos de dano",
        }
    }

    /// Stable key used for storage and default endpoint paths.
    pub fn slug(self) -> &'static str {
        match self {
            CatalogKind::Empresas => "empresas",
            CatalogKind::Campos => "campos",
            CatalogKind::Temporadas => "temporadas",
            CatalogKind::Ciclos => "ciclos",
            CatalogKind::Cultivos => "cultivos",
            CatalogKind::Variedades => "variedades",
            CatalogKind::Lotes => "lotes",
            CatalogKind::Articulos => "articulos",
            CatalogKind::Familias => "familias",
            CatalogKind::Almacenes => "almacenes",
            CatalogKind::Maquinaria => "maquinaria",
            CatalogKind::Implementos => "implementos",
            CatalogKind::Pluviometros => "pluviometros",
            CatalogKind::LineasRiego => "lineas_riego",
            CatalogKind::TiposDano => "tipos_dano",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.slug() == slug)
    }
}

/// One server row of a catalog. `data` is the row exactly as the server sent it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogRow {
    pub id: String,
    pub data: Value,
}

impl CatalogRow {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Build a row from a JSON object, reading its identity from `id_field`.
    /// Numeric and string identities are both accepted.
    pub fn from_value(value: Value, id_field: &str) -> Result<Self, SyncError> {
        let id = match value.get(id_field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(SyncError::MalformedRow(format!(
                    "missing `{id_field}` in {value}"
                )));
            }
        };
        Ok(Self { id, data: value })
    }
}
