use serde::Serialize;

/// Envelope for every paginated list endpoint.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: i64,
    pub offset: u64,
}

impl<T: Serialize> ListResponse<T> {
    pub fn new(items: Vec<T>, total: u64, limit: i64, offset: u64) -> Self {
        Self {
            items,
            total,
            limit,
            offset,
        }
    }
}
