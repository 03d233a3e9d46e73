//! Scraped-site adapters
//!
//! The four analytics sites publish their data as CSV exports or HTML
//! tables. This module knows which pages each site serves for a season;
//! decoding those pages is left to an injected [`PayloadParser`].

use std::sync::Arc;

use tracing::debug;

use crate::error::ParseError;
use crate::models::{DomainRecord, RawPayload, Resource, Season, Source, SyncScope};

use super::traits::{PayloadParser, SourceAdapter};

/// Adapter for a scraped site with an external payload parser
pub struct SiteAdapter {
    source: Source,
    parser: Arc<dyn PayloadParser>,
}

impl SiteAdapter {
    /// Creates an adapter for `source`
    ///
    /// Returns `None` for sources that are not scraped sites.
    pub fn new(source: Source, parser: Arc<dyn PayloadParser>) -> Option<Self> {
        match source {
            Source::NhlApi => None,
            _ => Some(Self { source, parser }),
        }
    }
}

impl std::fmt::Debug for SiteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteAdapter").field("source", &self.source).finish()
    }
}

impl SourceAdapter for SiteAdapter {
    fn source(&self) -> Source {
        self.source
    }

    fn list_resources<'a>(&'a self, scope: &SyncScope) -> Box<dyn Iterator<Item = Resource> + Send + 'a> {
        let resources = site_resources(self.source, scope.season);
        debug!(source = %self.source, count = resources.len(), "Enumerated site resources");
        Box::new(resources.into_iter())
    }

    fn parse(&self, payload: &RawPayload) -> Result<Vec<DomainRecord>, ParseError> {
        let records = self.parser.parse(payload)?;

        if let Some(stray) = records.iter().find(|r| r.source != self.source) {
            return Err(ParseError::malformed(
                payload.resource.id(),
                format!("parser attributed a record to {}", stray.source),
            ));
        }
        Ok(records)
    }
}

fn site_resources(source: Source, season: Season) -> Vec<Resource> {
    let start = season.start_year();
    let end = season.end_year();

    let pages: Vec<(&str, String)> = match source {
        Source::MoneyPuck => ["skaters", "goalies", "teams"]
            .into_iter()
            .map(|table| {
                (
                    table,
                    format!("/moneypuck/playerData/seasonSummary/{}/regular/{}.csv", start, table),
                )
            })
            .collect(),
        Source::HockeyReference => vec![
            ("league", format!("/leagues/NHL_{}.html", end)),
            ("skaters", format!("/leagues/NHL_{}_skaters.html", end)),
            ("goalies", format!("/leagues/NHL_{}_goalies.html", end)),
            ("games", format!("/leagues/NHL_{}_games.html", end)),
        ],
        Source::NaturalStatTrick => {
            let window = format!("fromseason={0}&thruseason={0}&stype=2&sit=5v5", season);
            vec![
                ("skaters", format!("/playerteams.php?{}&stdoi=std&pos=S", window)),
                ("goalies", format!("/playerteams.php?{}&stdoi=g&pos=G", window)),
                ("teams", format!("/teamtable.php?{}", window)),
            ]
        }
        Source::EliteProspects => vec![
            ("league", format!("/league/nhl/{}-{}", start, end)),
            ("draft", format!("/draft/nhl-entry-draft/{}", end)),
        ],
        Source::NhlApi => Vec::new(),
    };

    pages
        .into_iter()
        .map(|(kind, path)| Resource::new(kind, path).for_season(season))
        .collect()
}
