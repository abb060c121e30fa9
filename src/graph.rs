use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use sqlx::PgPool;

use crate::db;
use crate::error::{LibError, Result};
use crate::models::{
    DeleteRelationPayload, GraphCounts, GraphEdge, GraphNode, GraphView, NewBackground,
    NewPersonPayload, NodeRelations, Person, PersonBackground, PersonId, Relation,
    RelationPayload, UnorderedPair,
};

/// What happens when a relation write matches an existing unordered
/// pair. One policy per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeConflictPolicy {
    /// Overwrite the existing row's provenance note.
    #[default]
    Upsert,
    /// Reject the write with a conflict.
    Strict,
}

impl FromStr for EdgeConflictPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upsert" => Ok(EdgeConflictPolicy::Upsert),
            "strict" => Ok(EdgeConflictPolicy::Strict),
            other => Err(anyhow!("unknown edge conflict policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationWriteAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationWrite {
    pub action: RelationWriteAction,
    pub relation: Relation,
}

/// High-level graph actions over the persistence adapter. Every read
/// re-queries the store; the service holds no authoritative cache.
#[derive(Clone)]
pub struct GraphService {
    pool: Arc<PgPool>,
    edge_conflict: EdgeConflictPolicy,
}

impl GraphService {
    pub fn new(pool: Arc<PgPool>, edge_conflict: EdgeConflictPolicy) -> Self {
        Self {
            pool,
            edge_conflict,
        }
    }

    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    pub async fn add_person(&self, payload: NewPersonPayload) -> Result<Person> {
        let person = payload.normalize()?;

        if db::find_person_by_name(&self.pool, &person.name)
            .await?
            .is_some()
        {
            return Err(LibError::conflict(
                "A person with this name already exists",
                anyhow!("duplicate person name '{}'", person.name),
            ));
        }

        // No transaction wraps the check and the insert; concurrent
        // adds of the same name race and the unique constraint decides.
        db::insert_person(&self.pool, &person).await
    }

    pub async fn list_persons(&self) -> Result<Vec<Person>> {
        db::list_persons(&self.pool).await
    }

    pub async fn add_or_update_relation(&self, payload: RelationPayload) -> Result<RelationWrite> {
        let endpoints = payload.normalize()?;
        self.ensure_person_exists(endpoints.from).await?;
        self.ensure_person_exists(endpoints.to).await?;

        let pair = UnorderedPair::new(endpoints.from, endpoints.to);
        match db::find_relation_by_pair(&self.pool, pair).await? {
            Some(existing) => match self.edge_conflict {
                EdgeConflictPolicy::Strict => Err(LibError::conflict(
                    "These persons are already related",
                    anyhow!("relation {} already covers pair {}", existing.id, pair),
                )),
                EdgeConflictPolicy::Upsert => {
                    let relation = db::update_relation_source(
                        &self.pool,
                        existing.id,
                        endpoints.source.as_deref(),
                    )
                    .await?;
                    Ok(RelationWrite {
                        action: RelationWriteAction::Updated,
                        relation,
                    })
                }
            },
            None => {
                let relation = db::insert_relation(
                    &self.pool,
                    endpoints.from,
                    endpoints.to,
                    endpoints.source.as_deref(),
                )
                .await?;
                Ok(RelationWrite {
                    action: RelationWriteAction::Created,
                    relation,
                })
            }
        }
    }

    /// Update-only variant: overwrites the provenance note of an
    /// existing relation, failing when the pair is not related.
    pub async fn update_relation(&self, payload: RelationPayload) -> Result<Relation> {
        let endpoints = payload.normalize()?;
        let pair = UnorderedPair::new(endpoints.from, endpoints.to);

        match db::find_relation_by_pair(&self.pool, pair).await? {
            Some(existing) => {
                db::update_relation_source(&self.pool, existing.id, endpoints.source.as_deref())
                    .await
            }
            None => Err(LibError::not_found(
                "Relation not found",
                anyhow!("no relation covers pair {}", pair),
            )),
        }
    }

    pub async fn delete_relation(&self, payload: DeleteRelationPayload) -> Result<UnorderedPair> {
        let pair = payload.normalize()?;
        match db::delete_relation_by_pair(&self.pool, pair).await? {
            Some(relation_id) => {
                tracing::info!(relation = %relation_id, pair = %pair, "relation deleted");
                Ok(pair)
            }
            None => Err(LibError::not_found(
                "Relation not found",
                anyhow!("no relation covers pair {}", pair),
            )),
        }
    }

    pub async fn graph_view(&self) -> Result<GraphView> {
        let persons = db::list_persons(&self.pool).await?;
        let relations = db::list_relations(&self.pool).await?;
        Ok(connected_projection(&persons, &relations))
    }

    pub async fn node_relations(&self, person_id: PersonId) -> Result<NodeRelations> {
        let person = self.ensure_person_exists(person_id).await?;
        let relations = db::relations_touching(&self.pool, person_id).await?;
        let neighbor_ids = neighbor_ids(person_id, &relations);
        let neighbors = db::get_persons_by_ids(&self.pool, &neighbor_ids).await?;
        let degree = relations.len();

        Ok(NodeRelations {
            person,
            relations,
            neighbors,
            degree,
        })
    }

    pub async fn upsert_background(&self, background: NewBackground) -> Result<PersonBackground> {
        self.ensure_person_exists(background.person_id).await?;
        db::upsert_background(&self.pool, &background).await
    }

    pub async fn get_background(&self, person_id: PersonId) -> Result<PersonBackground> {
        db::get_background(&self.pool, person_id)
            .await?
            .ok_or_else(|| {
                LibError::not_found(
                    "Background not found",
                    anyhow!("no background for person {}", person_id),
                )
            })
    }

    async fn ensure_person_exists(&self, person_id: PersonId) -> Result<Person> {
        db::get_person(&self.pool, person_id).await?.ok_or_else(|| {
            LibError::not_found(
                "Person not found",
                anyhow!("person {} does not exist", person_id),
            )
        })
    }
}

/// Default display projection: every relation, but only persons that
/// are an endpoint of at least one relation. Isolated persons are
/// deliberately excluded to keep the visualization readable.
pub fn connected_projection(persons: &[Person], relations: &[Relation]) -> GraphView {
    let connected: HashSet<PersonId> = relations
        .iter()
        .flat_map(|relation| [relation.from_person_id, relation.to_person_id])
        .collect();

    let nodes: Vec<GraphNode> = persons
        .iter()
        .filter(|person| connected.contains(&person.id))
        .map(|person| GraphNode {
            id: person.id,
            label: person.name.clone(),
        })
        .collect();

    let edges: Vec<GraphEdge> = relations
        .iter()
        .map(|relation| GraphEdge {
            id: relation.id,
            from: relation.from_person_id,
            to: relation.to_person_id,
            source: relation.source.clone(),
        })
        .collect();

    let counts = GraphCounts {
        nodes: nodes.len(),
        edges: edges.len(),
    };

    GraphView {
        nodes,
        edges,
        counts,
    }
}

/// Distinct IDs on the far side of every relation touching
/// `person_id`, in first-seen order.
pub fn neighbor_ids(person_id: PersonId, relations: &[Relation]) -> Vec<PersonId> {
    let mut seen = HashSet::new();
    let mut neighbors = Vec::new();
    for relation in relations {
        let other = if relation.from_person_id == person_id {
            relation.to_person_id
        } else {
            relation.from_person_id
        };
        if other != person_id && seen.insert(other) {
            neighbors.push(other);
        }
    }
    neighbors
}
