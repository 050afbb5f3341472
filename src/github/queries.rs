//! GraphQL query builders for the v4 API.
//!
//! Queries are assembled as strings because the pagination cursors are
//! spliced into fixed query shapes; everything user-controlled goes
//! through [`quote`].

fn quote(cursor: Option<&str>) -> String {
    match cursor {
        Some(c) => format!("\"{}\"", c.replace('\\', "").replace('"', "")),
        None => "null".to_string(),
    }
}

/// One page of owned + contributed-to repositories, with language edges.
///
/// The two connections paginate independently; pass whichever cursors the
/// previous page returned.
pub fn repos_overview(owned_cursor: Option<&str>, contrib_cursor: Option<&str>) -> String {
    format!(
        r#"
        {{
            viewer {{
                login
                name
                followers {{ totalCount }}
                following {{ totalCount }}
                repositories(
                    first: 100,
                    orderBy: {{ field: UPDATED_AT, direction: DESC }},
                    after: {owned}) {{
                    pageInfo {{ hasNextPage endCursor }}
                    nodes {{
                        nameWithOwner
                        stargazers {{ totalCount }}
                        forkCount
                        isFork
                        isEmpty
                        isArchived
                        isPrivate
                        languages(first: 20, orderBy: {{ field: SIZE, direction: DESC }}) {{
                            edges {{
                                size
                                node {{ name color }}
                            }}
                        }}
                    }}
                }}
                repositoriesContributedTo(
                    first: 100,
                    includeUserRepositories: false,
                    orderBy: {{ field: UPDATED_AT, direction: DESC }},
                    contributionTypes: [COMMIT, PULL_REQUEST, REPOSITORY, PULL_REQUEST_REVIEW],
                    after: {contrib}) {{
                    pageInfo {{ hasNextPage endCursor }}
                    nodes {{
                        nameWithOwner
                        stargazers {{ totalCount }}
                        forkCount
                        isFork
                        isEmpty
                        isArchived
                        isPrivate
                        languages(first: 20, orderBy: {{ field: SIZE, direction: DESC }}) {{
                            edges {{
                                size
                                node {{ name color }}
                            }}
                        }}
                    }}
                }}
            }}
        }}"#,
        owned = quote(owned_cursor),
        contrib = quote(contrib_cursor),
    )
}

/// Every year in which the viewer has recorded contributions.
pub fn contribution_years() -> String {
    r#"
        query {
            viewer {
                contributionsCollection {
                    contributionYears
                }
            }
        }"#
    .to_string()
}

/// Per-year contribution totals, one aliased collection per year.
pub fn contribution_totals(years: &[i32]) -> String {
    let by_year: String = years
        .iter()
        .map(|year| {
            format!(
                r#"
                year{year}: contributionsCollection(
                    from: "{year}-01-01T00:00:00Z",
                    to: "{next}-01-01T00:00:00Z") {{
                    contributionCalendar {{ totalContributions }}
                }}"#,
                year = year,
                next = year + 1,
            )
        })
        .collect();
    format!(
        r#"
        query {{
            viewer {{
                {by_year}
            }}
        }}"#
    )
}

/// The full day-by-day contribution calendar for one year.
pub fn contribution_calendar(year: i32) -> String {
    format!(
        r#"
        {{
            viewer {{
                contributionsCollection(
                    from: "{year}-01-01T00:00:00Z",
                    to: "{year}-12-31T23:59:59Z") {{
                    contributionCalendar {{
                        weeks {{
                            contributionDays {{
                                contributionCount
                                date
                            }}
                        }}
                    }}
                }}
            }}
        }}"#
    )
}
