use tabled::{settings::Style, Table, Tabled};

use crate::link::Link;
use crate::manager::Stats;

#[derive(Tabled)]
pub struct LinkRow {
    #[tabled(rename = "Link")]
    pub link_id: i64,
    #[tabled(rename = "Feature")]
    pub feature_id: i64,
    #[tabled(rename = "Provision")]
    pub provision_id: i64,
    #[tabled(rename = "Created")]
    pub created_at: String,
}

impl From<&Link> for LinkRow {
    fn from(link: &Link) -> Self {
        Self {
            link_id: link.link_id,
            feature_id: link.feature_id,
            provision_id: link.provision_id,
            created_at: link.created_at.clone(),
        }
    }
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Table")]
    table: &'static str,
    #[tabled(rename = "Rows")]
    rows: usize,
}

/// Rounded table of links; empty string when there are none
pub fn links_table(links: &[Link]) -> String {
    if links.is_empty() {
        return String::new();
    }
    let rows: Vec<LinkRow> = links.iter().map(LinkRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn stats_table(stats: &Stats) -> String {
    let rows = vec![
        CountRow { table: "feature", rows: stats.features },
        CountRow { table: "provision", rows: stats.provisions },
        CountRow { table: "feature_provision_link", rows: stats.links },
    ];
    Table::new(rows).with(Style::rounded()).to_string()
}
