use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed seed file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation {operation_id}: start must be before end")]
    InvertedSpan { operation_id: OperationId },
}

/// One work order in a seed file, in the external camelCase layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedWorkOrder {
    pub id: WorkOrderId,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub qty: u32,
    #[serde(default)]
    pub operations: Vec<SeedOperation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedOperation {
    pub id: OperationId,
    pub index: u32,
    pub machine_id: MachineId,
    #[serde(default)]
    pub name: String,
    #[serde(with = "iso_instant")]
    pub start: Ms,
    #[serde(with = "iso_instant")]
    pub end: Ms,
}

impl SeedWorkOrder {
    /// Convert to engine records. Operations inherit this work order's id.
    pub fn into_info(self) -> Result<WorkOrderInfo, SeedError> {
        let operations = self
            .operations
            .into_iter()
            .map(|op| {
                let span = Span::try_new(op.start, op.end).ok_or_else(|| SeedError::InvertedSpan {
                    operation_id: op.id.clone(),
                })?;
                Ok(Operation {
                    id: op.id,
                    work_order_id: self.id.clone(),
                    index: op.index,
                    machine_id: op.machine_id,
                    name: op.name,
                    span,
                })
            })
            .collect::<Result<Vec<_>, SeedError>>()?;
        Ok(WorkOrderInfo {
            id: self.id,
            product: self.product,
            qty: self.qty,
            operations,
        })
    }
}

pub fn parse_seed(json: &str) -> Result<Vec<WorkOrderInfo>, SeedError> {
    let raw: Vec<SeedWorkOrder> = serde_json::from_str(json)?;
    raw.into_iter().map(SeedWorkOrder::into_info).collect()
}

pub fn load_seed_file(path: &Path) -> Result<Vec<WorkOrderInfo>, SeedError> {
    let reader = BufReader::new(File::open(path)?);
    let raw: Vec<SeedWorkOrder> = serde_json::from_reader(reader)?;
    raw.into_iter().map(SeedWorkOrder::into_info).collect()
}
