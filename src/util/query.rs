use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// General type used to specify sort order
#[derive(Debug, Clone, Copy, Deserialize, ToSchema, PartialEq, Eq)]
pub enum SortType {
    #[serde(rename = "asc")]
    #[schema(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    #[schema(rename = "desc")]
    Desc,
}

/// Page selection shared by every listing endpoint.
#[serde_inline_default]
#[derive(Debug, Deserialize, Validate, ToSchema, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    #[validate(range(min = 1))]
    #[serde_inline_default(1)]
    pub page: i64,
    #[validate(range(min = 1, max = 50))]
    #[serde_inline_default(20)]
    pub page_size: i64,
}

impl PageParams {
    #[must_use]
    pub const fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    #[must_use]
    pub const fn limit(&self) -> i64 {
        self.page_size
    }
}

/// A page of results plus the total number of matching rows.
#[derive(Debug, Serialize, ToSchema)]
pub struct Paginated<T> {
    pub results: Vec<T>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let params: PageParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, 20);
        assert_eq!(params.offset(), 0);
    }

    #[test]
    fn offset_skips_previous_pages() {
        let params = PageParams {
            page: 3,
            page_size: 10,
        };
        assert_eq!(params.offset(), 20);
        assert_eq!(params.limit(), 10);
    }

    #[test]
    fn oversized_pages_are_rejected() {
        let params = PageParams {
            page: 1,
            page_size: 500,
        };
        assert!(params.validate().is_err());
    }
}
