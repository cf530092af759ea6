//! Query segment aggregation.
//!
//! Collects one fragment per parameter and stitches them into the final
//! statement. Every joined parameter gets its own values table alias, in the
//! order the fragments were added:
//!
//! ```text
//! SELECT R.RESOURCE_ID, ... , LR.LOGICAL_ID
//!   FROM Patient_RESOURCES R, Patient_LOGICAL_RESOURCES LR, Patient_STR_VALUES P1
//!  WHERE R.RESOURCE_ID = LR.CURRENT_RESOURCE_ID AND R.IS_DELETED <> 'Y'
//!    AND P1.LOGICAL_RESOURCE_ID = LR.LOGICAL_RESOURCE_ID AND (P1.PARAMETER_NAME_ID = ...)
//!  ORDER BY LR.LOGICAL_RESOURCE_ID ASC LIMIT 10 OFFSET 0
//! ```
//!
//! The count variant shares FROM and WHERE and drops ordering and pagination.

use std::fmt;

use crate::config::{BindStyle, PaginationDialect};
use crate::error::QueryBuilderError;
use crate::fragment::{Fragment, SqlValue, count_placeholders};
use crate::predicates::{Placement, composite, placement};
use crate::query::{Pagination, QueryParameter};
use crate::schema::{
    self, DATA, IS_DELETED, LAST_UPDATED, LOGICAL_ID, LOGICAL_RESOURCE_ID, LOGICAL_RESOURCES_ALIAS,
    RESOURCE_ID, RESOURCES_ALIAS, VERSION_ID, ValuesTable,
};

/// Name of the derived table wrapping a system-level UNION.
pub const COMBINED_RESULTS: &str = "COMBINED_RESULTS";

/// A finished statement with its bind values in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedQuery {
    pub sql: String,
    pub binds: Vec<SqlValue>,
}

impl fmt::Display for GeneratedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

#[derive(Debug, Clone)]
struct Segment {
    fragment: Fragment,
    placement: Placement,
    component_tables: Vec<ValuesTable>,
}

/// Builds the row and count statements of one resource type.
#[derive(Debug, Clone)]
pub struct QuerySegmentAggregator {
    resource_type: String,
    segments: Vec<Segment>,
    dialect: PaginationDialect,
    bind_style: BindStyle,
}

impl QuerySegmentAggregator {
    pub fn new(resource_type: impl Into<String>, dialect: PaginationDialect, bind_style: BindStyle) -> Self {
        Self {
            resource_type: resource_type.into(),
            segments: Vec::new(),
            dialect,
            bind_style,
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Add the fragment built for `parameter`.
    ///
    /// The parameter decides whether the fragment needs a joined values
    /// table, and which one.
    pub fn add_fragment(
        &mut self,
        fragment: Fragment,
        parameter: &QueryParameter,
    ) -> Result<(), QueryBuilderError> {
        let placement = placement(&self.resource_type, parameter)?;
        let component_tables = match placement {
            Placement::Joined(ValuesTable::Composites) => {
                composite::component_tables(&self.resource_type, parameter)?
            }
            _ => Vec::new(),
        };
        self.segments.push(Segment {
            fragment,
            placement,
            component_tables,
        });
        Ok(())
    }

    pub fn build_query(&self, pagination: &Pagination) -> Result<GeneratedQuery, QueryBuilderError> {
        let mut binds = Vec::new();
        let mut sql = format!("SELECT {} FROM ", row_columns());
        self.render_from_where(&mut sql, &mut binds)?;
        sql.push_str(&format!(
            " ORDER BY {LOGICAL_RESOURCES_ALIAS}.{LOGICAL_RESOURCE_ID} ASC"
        ));
        sql.push_str(&self.dialect.clause(pagination.offset(), pagination.page_size));
        finish(sql, binds, self.bind_style)
    }

    pub fn build_count_query(&self) -> Result<GeneratedQuery, QueryBuilderError> {
        let mut binds = Vec::new();
        let mut sql = "SELECT COUNT(*) FROM ".to_string();
        self.render_from_where(&mut sql, &mut binds)?;
        finish(sql, binds, self.bind_style)
    }

    fn render_from_where(
        &self,
        sql: &mut String,
        binds: &mut Vec<SqlValue>,
    ) -> Result<(), QueryBuilderError> {
        let resource_type = &self.resource_type;
        sql.push_str(&format!(
            "{} {RESOURCES_ALIAS}, {} {LOGICAL_RESOURCES_ALIAS}",
            schema::resources_table(resource_type),
            schema::logical_resources_table(resource_type)
        ));

        let mut aliases = Vec::with_capacity(self.segments.len());
        let mut joined = 0;
        for segment in &self.segments {
            match segment.placement {
                Placement::Joined(table) => {
                    joined += 1;
                    let alias = format!("P{joined}");
                    sql.push_str(&format!(", {} {alias}", table.table_name(resource_type)));
                    if !segment.component_tables.is_empty() {
                        sql.push_str(&composite::component_joins(
                            resource_type,
                            &alias,
                            &segment.component_tables,
                        ));
                    }
                    aliases.push(Some(alias));
                }
                Placement::Root => aliases.push(None),
            }
        }

        sql.push_str(" WHERE ");
        sql.push_str(&schema::current_version_condition(
            RESOURCES_ALIAS,
            LOGICAL_RESOURCES_ALIAS,
        ));
        for (segment, alias) in self.segments.iter().zip(&aliases) {
            match alias {
                Some(alias) => {
                    sql.push_str(&format!(
                        " AND {alias}.{LOGICAL_RESOURCE_ID} = {LOGICAL_RESOURCES_ALIAS}.{LOGICAL_RESOURCE_ID} AND "
                    ));
                    segment.fragment.render_into(alias, self.bind_style, sql, binds)?;
                }
                None => {
                    sql.push_str(" AND ");
                    segment
                        .fragment
                        .render_into(LOGICAL_RESOURCES_ALIAS, self.bind_style, sql, binds)?;
                }
            }
        }
        Ok(())
    }
}

fn row_columns() -> String {
    format!(
        "{r}.{RESOURCE_ID}, {r}.{LOGICAL_RESOURCE_ID}, {r}.{VERSION_ID}, {r}.{LAST_UPDATED}, \
         {r}.{IS_DELETED}, {r}.{DATA}, {lr}.{LOGICAL_ID}",
        r = RESOURCES_ALIAS,
        lr = LOGICAL_RESOURCES_ALIAS,
    )
}

/// Row query over several resource types at once.
///
/// Each type contributes its own select, tagged with its type name, and the
/// UNION is paged as a whole.
pub fn build_system_query(
    parts: &[QuerySegmentAggregator],
    pagination: &Pagination,
) -> Result<GeneratedQuery, QueryBuilderError> {
    let Some(first) = parts.first() else {
        return Err(QueryBuilderError::Unsupported(
            "system-level search without any resource type".to_string(),
        ));
    };

    let mut binds = Vec::new();
    let mut sql = "SELECT * FROM (".to_string();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            sql.push_str(" UNION ALL ");
        }
        sql.push_str(&format!(
            "SELECT '{}' AS RESOURCE_TYPE, {} FROM ",
            part.resource_type,
            row_columns()
        ));
        part.render_from_where(&mut sql, &mut binds)?;
    }
    sql.push_str(&format!(
        ") {COMBINED_RESULTS} ORDER BY {COMBINED_RESULTS}.RESOURCE_TYPE ASC, \
         {COMBINED_RESULTS}.{LOGICAL_RESOURCE_ID} ASC"
    ));
    sql.push_str(&first.dialect.clause(pagination.offset(), pagination.page_size));
    finish(sql, binds, first.bind_style)
}

/// Count over several resource types: the sum of the per-type counts.
pub fn build_system_count_query(
    parts: &[QuerySegmentAggregator],
) -> Result<GeneratedQuery, QueryBuilderError> {
    let Some(first) = parts.first() else {
        return Err(QueryBuilderError::Unsupported(
            "system-level search without any resource type".to_string(),
        ));
    };

    let mut binds = Vec::new();
    let mut sql = "SELECT SUM(CNT) FROM (".to_string();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            sql.push_str(" UNION ALL ");
        }
        sql.push_str("SELECT COUNT(*) AS CNT FROM ");
        part.render_from_where(&mut sql, &mut binds)?;
    }
    sql.push_str(&format!(") {COMBINED_RESULTS}"));
    finish(sql, binds, first.bind_style)
}

/// Re-check the placeholder/bind pairing on the finished statement.
fn finish(
    sql: String,
    binds: Vec<SqlValue>,
    style: BindStyle,
) -> Result<GeneratedQuery, QueryBuilderError> {
    let placeholders = count_placeholders(&sql);
    let expected = match style {
        BindStyle::Parameter => binds.len(),
        BindStyle::Inline => 0,
    };
    if placeholders != expected || (style == BindStyle::Inline && !binds.is_empty()) {
        return Err(QueryBuilderError::InvariantViolation(format!(
            "{placeholders} placeholders but {} bind values",
            binds.len()
        )));
    }
    Ok(GeneratedQuery { sql, binds })
}
