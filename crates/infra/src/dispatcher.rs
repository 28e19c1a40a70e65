//! Routing of movement requests to the processor for their type.

use tracing::debug;

use fibreflow_core::{ProjectId, StockError, StockResult};
use fibreflow_stock::{GrnData, IssueData, MovementInput, MovementResult, MovementType};

use crate::processors::{GrnProcessor, IssueProcessor, MovementCreator};
use crate::store::StockStore;

/// A processor that turns one request payload into a posted movement.
#[async_trait::async_trait]
pub trait MovementProcessor: Send + Sync {
    type Request: Send + Sync;

    /// Movement type this processor posts.
    const MOVEMENT_TYPE: MovementType;

    async fn process(&self, project_id: ProjectId, request: &Self::Request) -> StockResult<MovementResult>;
}

#[async_trait::async_trait]
impl<S: StockStore> MovementProcessor for GrnProcessor<S> {
    type Request = GrnData;
    const MOVEMENT_TYPE: MovementType = MovementType::Grn;

    async fn process(&self, project_id: ProjectId, request: &GrnData) -> StockResult<MovementResult> {
        self.process_grn(project_id, request).await
    }
}

#[async_trait::async_trait]
impl<S: StockStore> MovementProcessor for IssueProcessor<S> {
    type Request = IssueData;
    const MOVEMENT_TYPE: MovementType = MovementType::Issue;

    async fn process(&self, project_id: ProjectId, request: &IssueData) -> StockResult<MovementResult> {
        self.process_issue(project_id, request).await
    }
}

/// Any movement request the ledger accepts.
#[derive(Debug, Clone)]
pub enum MovementRequest {
    Grn(GrnData),
    Issue(IssueData),
    /// A bare header through [`MovementCreator`]; positions are not touched.
    Manual(MovementInput),
    Transfer(MovementInput),
    Return(MovementInput),
}

impl MovementRequest {
    /// `None` for a manual request that does not name its type.
    pub fn movement_type(&self) -> Option<MovementType> {
        match self {
            MovementRequest::Grn(_) => Some(MovementType::Grn),
            MovementRequest::Issue(_) => Some(MovementType::Issue),
            MovementRequest::Manual(input) => input.movement_type,
            MovementRequest::Transfer(_) => Some(MovementType::Transfer),
            MovementRequest::Return(_) => Some(MovementType::Return),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MovementDispatcher<S> {
    creator: MovementCreator<S>,
    grn: GrnProcessor<S>,
    issue: IssueProcessor<S>,
}

impl<S: Clone> MovementDispatcher<S> {
    pub fn new(store: S, warehouse_location: impl Into<String>) -> Self {
        let warehouse_location = warehouse_location.into();
        Self {
            creator: MovementCreator::new(store.clone()),
            grn: GrnProcessor::new(store.clone()).with_warehouse(warehouse_location.clone()),
            issue: IssueProcessor::new(store).with_warehouse(warehouse_location),
        }
    }
}

impl<S> MovementDispatcher<S> {
    pub fn creator(&self) -> &MovementCreator<S> {
        &self.creator
    }

    pub fn grn(&self) -> &GrnProcessor<S> {
        &self.grn
    }

    pub fn issue(&self) -> &IssueProcessor<S> {
        &self.issue
    }
}

impl<S: StockStore> MovementDispatcher<S> {
    /// Post `request` for `project_id`.
    ///
    /// Manual requests inherit `project_id` and must not name a different one;
    /// their result carries no lines. Transfers and returns have no processor
    /// and fail with `Unsupported`.
    pub async fn dispatch(&self, project_id: ProjectId, request: MovementRequest) -> StockResult<MovementResult> {
        match request {
            MovementRequest::Grn(grn) => run(&self.grn, project_id, &grn).await,
            MovementRequest::Issue(issue) => run(&self.issue, project_id, &issue).await,
            MovementRequest::Manual(mut input) => {
                match input.project_id {
                    Some(other) if other != project_id => {
                        return Err(StockError::validation(format!(
                            "project_id {other} does not match {project_id}"
                        )));
                    }
                    _ => input.project_id = Some(project_id),
                }
                let movement = self.creator.create_movement(input).await?;
                Ok(MovementResult {
                    movement,
                    items: Vec::new(),
                })
            }
            MovementRequest::Transfer(_) => Err(StockError::Unsupported(MovementType::Transfer.to_string())),
            MovementRequest::Return(_) => Err(StockError::Unsupported(MovementType::Return.to_string())),
        }
    }
}

async fn run<P: MovementProcessor>(
    processor: &P,
    project_id: ProjectId,
    request: &P::Request,
) -> StockResult<MovementResult> {
    debug!(movement_type = %P::MOVEMENT_TYPE, project_id = %project_id, "dispatching movement");
    let result = processor.process(project_id, request).await?;
    debug_assert_eq!(result.movement.movement_type, P::MOVEMENT_TYPE);
    Ok(result)
}
