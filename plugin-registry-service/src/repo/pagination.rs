//! Cursor pagination over the plugin table.
//!
//! A cursor is the primary key of the row directly before a page. Page
//! anchors are computed from a `row_number()` window: every row whose
//! (1-based) row number is congruent to the cursor row modulo the page size
//! anchors the page starting right after it.

/// Number of page links emitted on each side of the current page.
pub const SURROUNDING_PAGES: i64 = 5;

pub const DEFAULT_ITEM_COUNT: i64 = 25;
pub const MAX_ITEM_COUNT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginSortField {
    Id,
    Name,
    Version,
}

impl PluginSortField {
    pub fn parse(name: &str) -> Option<PluginSortField> {
        match name {
            "id" => Some(PluginSortField::Id),
            "name" => Some(PluginSortField::Name),
            "version" => Some(PluginSortField::Version),
            _ => None,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            PluginSortField::Id => "plugins.id",
            PluginSortField::Name => "plugins.identifier",
            PluginSortField::Version => "plugins.sort_version",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub field: PluginSortField,
    pub descending: bool,
}

/// Parses a sort string like `name,-version`. Unknown column names are
/// reported back to the caller.
pub fn parse_sort_string(sort: &str) -> Result<Vec<SortOrder>, String> {
    let mut orders = Vec::new();
    for part in sort.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, descending) = match part.strip_prefix('-') {
            Some(name) => (name, true),
            None => (part.trim_start_matches('+'), false),
        };
        let field = PluginSortField::parse(name)
            .ok_or_else(|| format!("Unknown sort column '{name}'"))?;
        orders.push(SortOrder { field, descending });
    }
    Ok(orders)
}

/// Renders the `ORDER BY` clause for the given sort. The primary key is
/// always appended as the final tiebreak.
pub fn order_by_clause(sort: &[SortOrder]) -> String {
    let mut clauses: Vec<String> = sort
        .iter()
        .map(|order| {
            format!(
                "{} {}",
                order.field.column(),
                if order.descending { "DESC" } else { "ASC" }
            )
        })
        .collect();
    if !sort.iter().any(|order| order.field == PluginSortField::Id) {
        clauses.push("plugins.id ASC".to_string());
    }
    clauses.join(", ")
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub cursor: Option<i64>,
    pub item_count: i64,
    pub sort: Vec<SortOrder>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            cursor: None,
            item_count: DEFAULT_ITEM_COUNT,
            sort: vec![
                SortOrder {
                    field: PluginSortField::Name,
                    descending: false,
                },
                SortOrder {
                    field: PluginSortField::Version,
                    descending: true,
                },
            ],
        }
    }
}

/// One reachable page: the cursor that leads to it (`None` for page 1), its
/// 1-based page number and the row number of its first item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAnchor {
    pub cursor: Option<i64>,
    pub page: i64,
    pub row: i64,
}

#[derive(Debug, Clone)]
pub struct PaginationInfo {
    pub collection_size: i64,
    /// 1-based row number of the cursor row, 0 when there is no cursor.
    pub cursor_row: i64,
    /// 1-based page number of the current page.
    pub cursor_page: i64,
    pub surrounding_pages: Vec<PageAnchor>,
    pub last_page: Option<PageAnchor>,
}

impl PaginationInfo {
    pub fn single_page(collection_size: i64) -> PaginationInfo {
        PaginationInfo {
            collection_size,
            cursor_row: 0,
            cursor_page: 1,
            surrounding_pages: vec![],
            last_page: Some(PageAnchor {
                cursor: None,
                page: 1,
                row: 0,
            }),
        }
    }
}

/// Digests the raw `(anchor id, row number)` pairs from the window query
/// into correctly numbered page anchors.
///
/// Returns the surrounding pages, the last page, the cursor row and the
/// cursor page. Page numbers from the window query are offset by one (rows
/// are 1-based, page 1 has no anchor) plus one more when the first page is a
/// partial page (cursor not page aligned).
pub fn digest_pages(
    anchors: &[(i64, i64)],
    cursor: Option<i64>,
    item_count: i64,
    max_surrounding: i64,
    collection_size: i64,
) -> (Vec<PageAnchor>, Option<PageAnchor>, i64, i64) {
    let mut surrounding: Vec<PageAnchor> = Vec::new();
    let mut cursor_row = 0;
    let mut cursor_page = 1;

    if anchors.is_empty() {
        return (surrounding, None, cursor_row, cursor_page);
    }

    let page_offset = if anchors[0].1 % item_count == 0 { 1 } else { 2 };

    let mut current_count = 0;
    for &(anchor_id, row) in anchors {
        // >= because the collection size may not include the cursor row
        if row >= collection_size {
            break;
        }
        if cursor == Some(anchor_id) {
            // the cursor's own anchor marks the current page, pages on the
            // other side of it start counting from zero again
            current_count = 0;
            cursor_row = row;
            cursor_page = row / item_count + page_offset;
            continue;
        }
        current_count += 1;
        if current_count <= max_surrounding {
            surrounding.push(PageAnchor {
                cursor: Some(anchor_id),
                page: row / item_count + page_offset,
                row: row + 1,
            });
        }
    }

    let mut last = anchors[anchors.len() - 1];
    if last.1 >= collection_size && anchors.len() > 1 {
        last = anchors[anchors.len() - 2];
    }
    let last_page = PageAnchor {
        cursor: Some(last.0),
        page: last.1 / item_count + page_offset,
        row: last.1 + 1,
    };

    (surrounding, Some(last_page), cursor_row, cursor_page)
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn sort_strings_parse_direction_prefixes() {
        let sort = parse_sort_string("name,-version").unwrap();
        assert_eq!(sort.len(), 2);
        assert!(!sort[0].descending);
        assert!(sort[1].descending);
        assert!(parse_sort_string("nope").is_err());
    }

    #[test]
    fn order_by_appends_id_tiebreak() {
        let sort = parse_sort_string("name,-version").unwrap();
        assert_eq!(
            order_by_clause(&sort),
            "plugins.identifier ASC, plugins.sort_version DESC, plugins.id ASC"
        );
        let id_sort = parse_sort_string("-id").unwrap();
        assert_eq!(order_by_clause(&id_sort), "plugins.id DESC");
    }

    #[test]
    fn digest_without_cursor_numbers_pages_from_one() {
        // 60 rows, 25 per page: anchors at rows 25 and 50
        let anchors = vec![(125, 25), (150, 50)];
        let (surrounding, last, cursor_row, cursor_page) =
            digest_pages(&anchors, None, 25, SURROUNDING_PAGES, 60);
        assert_eq!(cursor_row, 0);
        assert_eq!(cursor_page, 1);
        assert_eq!(
            surrounding,
            vec![
                PageAnchor {
                    cursor: Some(125),
                    page: 2,
                    row: 26
                },
                PageAnchor {
                    cursor: Some(150),
                    page: 3,
                    row: 51
                },
            ]
        );
        assert_eq!(last.unwrap().page, 3);
    }

    #[test]
    fn digest_with_cursor_keeps_current_page_out_of_surrounding() {
        // cursor at row 25 (id 125): current page is page 2
        let anchors = vec![(125, 25), (150, 50), (175, 75)];
        let (surrounding, last, cursor_row, cursor_page) =
            digest_pages(&anchors, Some(125), 25, SURROUNDING_PAGES, 100);
        assert_eq!(cursor_row, 25);
        assert_eq!(cursor_page, 2);
        assert!(surrounding.iter().all(|p| p.cursor != Some(125)));
        assert_eq!(last.unwrap().page, 4);
    }

    #[test]
    fn digest_offsets_pages_for_unaligned_cursors() {
        // cursor at row 10 with 25 items per page: page 1 holds rows 1..10,
        // the cursor page (rows 11..35) is page 2
        let anchors = vec![(110, 10), (135, 35), (160, 60)];
        let (surrounding, _, cursor_row, cursor_page) =
            digest_pages(&anchors, Some(110), 25, SURROUNDING_PAGES, 70);
        assert_eq!(cursor_row, 10);
        assert_eq!(cursor_page, 2);
        assert_eq!(surrounding[0].page, 3);
        assert_eq!(surrounding[1].page, 4);
    }

    #[test]
    fn digest_drops_empty_trailing_pages() {
        // anchor at row 50 == collection size: the page after it is empty
        let anchors = vec![(125, 25), (150, 50)];
        let (surrounding, last, _, _) = digest_pages(&anchors, None, 25, SURROUNDING_PAGES, 50);
        assert_eq!(surrounding.len(), 1);
        assert_eq!(last.unwrap().page, 2);
    }

    #[test]
    fn digest_of_empty_anchor_list_is_page_one() {
        let (surrounding, last, cursor_row, cursor_page) =
            digest_pages(&[], None, 25, SURROUNDING_PAGES, 10);
        assert!(surrounding.is_empty());
        assert!(last.is_none());
        assert_eq!(cursor_row, 0);
        assert_eq!(cursor_page, 1);
    }
}
