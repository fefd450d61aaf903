use crate::catalog::Catalog;
use crate::common::Handle;
use crate::error::Result;
use crate::index::btree::BTreeIndex;
use crate::row::Row;
use crate::storage::relation::HeapRelation;

/// A small tree of plan nodes rooted at the final projection or scan.
/// Lowering happens in two stages: `optimize` rewrites the tree, then
/// `pipeline`/`evaluate` run it.
pub enum EvalPlan {
    /// emits every live handle of a relation
    TableScan { relation: HeapRelation },
    /// emits the handles matching an exact key probe of a unique index
    IndexLookup {
        relation: HeapRelation,
        index: BTreeIndex,
        key: Row,
    },
    /// filters a handle set by an equality conjunction
    Select { filter: Row, child: Box<EvalPlan> },
    /// realizes handles into rows projected to the named columns
    Project {
        columns: Vec<String>,
        child: Box<EvalPlan>,
    },
}

impl EvalPlan {
    /// Rewrites a Select over a bare TableScan into an index probe when a
    /// unique index exactly covers the predicate's column set. Everything
    /// else passes through unchanged.
    pub fn optimize(self, catalog: &mut Catalog) -> Result<EvalPlan> {
        match self {
            EvalPlan::Project { columns, child } => Ok(EvalPlan::Project {
                columns,
                child: Box::new(child.optimize(catalog)?),
            }),
            EvalPlan::Select { filter, child } => match *child {
                EvalPlan::TableScan { relation } => {
                    for index_name in catalog.get_index_names(relation.name())? {
                        let index = catalog.get_index(relation.name(), &index_name)?;
                        if index.key_columns().len() == filter.len()
                            && index
                                .key_columns()
                                .iter()
                                .all(|column| filter.contains(column))
                        {
                            return Ok(EvalPlan::IndexLookup {
                                relation,
                                index,
                                key: filter,
                            });
                        }
                    }
                    Ok(EvalPlan::Select {
                        filter,
                        child: Box::new(EvalPlan::TableScan { relation }),
                    })
                }
                other => Ok(EvalPlan::Select {
                    filter,
                    child: Box::new(other.optimize(catalog)?),
                }),
            },
            other => Ok(other),
        }
    }

    /// Runs the plan down to a handle set, suitable for streaming deletion
    /// or projection. A Select over a table scan pushes its predicate into
    /// the scan's filter.
    pub fn pipeline(&mut self) -> Result<(&mut HeapRelation, Vec<Handle>)> {
        match self {
            EvalPlan::TableScan { relation } => {
                let handles = relation.select()?;
                Ok((relation, handles))
            }
            EvalPlan::IndexLookup {
                relation,
                index,
                key,
            } => {
                let handles = index.lookup(key)?;
                Ok((relation, handles))
            }
            EvalPlan::Select { filter, child } => match child.as_mut() {
                EvalPlan::TableScan { relation } => {
                    let handles = relation.select_where(filter)?;
                    Ok((relation, handles))
                }
                other => {
                    let (relation, handles) = other.pipeline()?;
                    let mut matching = Vec::new();
                    for handle in handles {
                        let row = relation.project(handle)?;
                        if filter
                            .iter()
                            .all(|(column, value)| row.get(column) == Some(value))
                        {
                            matching.push(handle);
                        }
                    }
                    Ok((relation, matching))
                }
            },
            EvalPlan::Project { child, .. } => child.pipeline(),
        }
    }

    /// Materializes the plan into rows.
    pub fn evaluate(&mut self) -> Result<Vec<Row>> {
        match self {
            EvalPlan::Project { columns, child } => {
                let (relation, handles) = child.pipeline()?;
                handles
                    .into_iter()
                    .map(|handle| relation.project_columns(handle, columns))
                    .collect()
            }
            other => {
                let (relation, handles) = other.pipeline()?;
                handles
                    .into_iter()
                    .map(|handle| relation.project(handle))
                    .collect()
            }
        }
    }
}
