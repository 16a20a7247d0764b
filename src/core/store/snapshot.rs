// src/core/store/snapshot.rs

//! The FLSNAP snapshot format for FSM persistence.
//!
//! Layout: a magic/version header, one opcode-tagged section per table in
//! `TableId` order (each row individually length-prefixed), an EOF opcode,
//! and a trailing CRC-64 over everything before it. Restore parses into a
//! fresh `StoreInner`, rebuilding every secondary index, and the caller
//! swaps it in atomically.

use super::{ALL_TABLES, StoreInner, TableId};
use crate::core::FlotillaError;
use crate::core::model::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{CRC_64_REDIS, Crc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

const SNAPSHOT_MAGIC: &[u8] = b"FLOTILLA";
const SNAPSHOT_VERSION: &[u8] = b"0001";

const OPCODE_META: u8 = 0xFA;
const OPCODE_EOF: u8 = 0xFF;

const CHECKSUM_ALGO: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

fn encode_row<T: Serialize>(buf: &mut BytesMut, row: &T) -> Result<(), FlotillaError> {
    let bytes = bincode::serde::encode_to_vec(row, bincode::config::standard())
        .map_err(|e| FlotillaError::Internal(format!("snapshot encode: {e}")))?;
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(&bytes);
    Ok(())
}

fn decode_row<T: DeserializeOwned>(cursor: &mut Bytes) -> Result<T, FlotillaError> {
    if cursor.remaining() < 4 {
        return Err(FlotillaError::Internal("truncated snapshot row".to_string()));
    }
    let len = cursor.get_u32() as usize;
    if cursor.remaining() < len {
        return Err(FlotillaError::Internal("truncated snapshot row".to_string()));
    }
    let bytes = cursor.split_to(len);
    let (row, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
        .map_err(|e| FlotillaError::Internal(format!("snapshot decode: {e}")))?;
    Ok(row)
}

fn encode_section<T: Serialize>(
    buf: &mut BytesMut,
    table: TableId,
    table_index: u64,
    rows: &[&T],
) -> Result<(), FlotillaError> {
    buf.put_u8(table as u8);
    buf.put_u64(table_index);
    buf.put_u32(rows.len() as u32);
    for row in rows {
        encode_row(buf, row)?;
    }
    Ok(())
}

/// Serializes the whole store into the FLSNAP wire form.
pub fn persist(inner: &StoreInner) -> Result<Bytes, FlotillaError> {
    let mut buf = BytesMut::with_capacity(64 * 1024);
    buf.put_slice(SNAPSHOT_MAGIC);
    buf.put_slice(SNAPSHOT_VERSION);

    buf.put_u8(OPCODE_META);
    buf.put_u64(inner.latest_index);

    for table in ALL_TABLES {
        let table_index = inner.table_index(table);
        match table {
            TableId::Nodes => {
                let rows: Vec<&Node> = inner.nodes.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::Jobs => {
                let rows: Vec<&Job> = inner.jobs.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::JobVersions => {
                let rows: Vec<&Job> = inner
                    .job_versions
                    .values()
                    .flat_map(|v| v.iter().map(|a| a.as_ref()))
                    .collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::Allocations => {
                let rows: Vec<&Allocation> = inner.allocs.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::Evaluations => {
                let rows: Vec<&Evaluation> = inner.evals.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::Deployments => {
                let rows: Vec<&Deployment> =
                    inner.deployments.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::AclPolicies => {
                let rows: Vec<&AclPolicy> =
                    inner.acl_policies.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::AclRoles => {
                let rows: Vec<&AclRole> = inner.acl_roles.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::AclTokens => {
                let rows: Vec<&AclToken> = inner.acl_tokens.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::Namespaces => {
                let rows: Vec<&Namespace> =
                    inner.namespaces.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::Services => {
                let rows: Vec<&ServiceRegistration> =
                    inner.services.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::RootKeys => {
                let rows: Vec<&RootKeyMeta> =
                    inner.root_keys.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
            TableId::VolumeClaims => {
                let rows: Vec<&TaskGroupHostVolumeClaim> =
                    inner.volume_claims.values().map(|a| a.as_ref()).collect();
                encode_section(&mut buf, table, table_index, &rows)?;
            }
        }
    }

    buf.put_u8(OPCODE_EOF);
    let checksum = CHECKSUM_ALGO.checksum(&buf);
    buf.put_u64(checksum);
    Ok(buf.freeze())
}

/// Parses an FLSNAP image into a fresh interior. Any decode failure is a
/// hard error: a corrupt committed snapshot is not recoverable.
pub fn restore(data: Bytes) -> Result<StoreInner, FlotillaError> {
    if data.len() < SNAPSHOT_MAGIC.len() + SNAPSHOT_VERSION.len() + 8 {
        return Err(FlotillaError::Internal("snapshot too short".to_string()));
    }

    let body_len = data.len() - 8;
    let expected = CHECKSUM_ALGO.checksum(&data[..body_len]);
    let trailer: [u8; 8] = data[body_len..]
        .try_into()
        .map_err(|_| FlotillaError::Internal("truncated snapshot trailer".to_string()))?;
    let actual = u64::from_be_bytes(trailer);
    if expected != actual {
        return Err(FlotillaError::Internal(
            "snapshot checksum mismatch".to_string(),
        ));
    }

    let mut cursor = data.slice(..body_len);
    if cursor.split_to(SNAPSHOT_MAGIC.len()) != SNAPSHOT_MAGIC {
        return Err(FlotillaError::Internal("bad snapshot magic".to_string()));
    }
    if cursor.split_to(SNAPSHOT_VERSION.len()) != SNAPSHOT_VERSION {
        return Err(FlotillaError::Internal(
            "unsupported snapshot version".to_string(),
        ));
    }

    let mut inner = StoreInner::default();

    while cursor.has_remaining() {
        let opcode = cursor.get_u8();
        match opcode {
            OPCODE_META => {
                inner.latest_index = cursor.get_u64();
            }
            OPCODE_EOF => break,
            tag => {
                let table = table_from_tag(tag)?;
                let table_index = cursor.get_u64();
                let count = cursor.get_u32();
                inner.table_indexes.insert(table, table_index);
                for _ in 0..count {
                    restore_row(&mut inner, table, &mut cursor)?;
                }
            }
        }
    }

    Ok(inner)
}

fn table_from_tag(tag: u8) -> Result<TableId, FlotillaError> {
    ALL_TABLES
        .into_iter()
        .find(|t| *t as u8 == tag)
        .ok_or_else(|| FlotillaError::Internal(format!("unknown snapshot section 0x{tag:02X}")))
}

fn restore_row(
    inner: &mut StoreInner,
    table: TableId,
    cursor: &mut Bytes,
) -> Result<(), FlotillaError> {
    match table {
        TableId::Nodes => {
            let node: Node = decode_row(cursor)?;
            inner.nodes.insert(node.id.clone(), Arc::new(node));
        }
        TableId::Jobs => {
            let job: Job = decode_row(cursor)?;
            inner
                .jobs
                .insert((job.namespace.clone(), job.id.clone()), Arc::new(job));
        }
        TableId::JobVersions => {
            let job: Job = decode_row(cursor)?;
            inner
                .job_versions
                .entry((job.namespace.clone(), job.id.clone()))
                .or_default()
                .push(Arc::new(job));
        }
        TableId::Allocations => {
            let alloc: Allocation = decode_row(cursor)?;
            let id = alloc.id.clone();
            inner
                .allocs_by_job
                .entry((alloc.namespace.clone(), alloc.job_id.clone()))
                .or_default()
                .insert(id.clone());
            if let Some(dep) = &alloc.deployment_id {
                inner
                    .allocs_by_deployment
                    .entry(dep.clone())
                    .or_default()
                    .insert(id.clone());
            }
            if !alloc.node_id.is_empty() {
                inner
                    .allocs_by_node
                    .entry(alloc.node_id.clone())
                    .or_default()
                    .insert(id.clone());
            }
            inner.allocs.insert(id, Arc::new(alloc));
        }
        TableId::Evaluations => {
            let eval: Evaluation = decode_row(cursor)?;
            inner
                .evals_by_job
                .entry((eval.namespace.clone(), eval.job_id.clone()))
                .or_default()
                .insert(eval.id.clone());
            inner.evals.insert(eval.id.clone(), Arc::new(eval));
        }
        TableId::Deployments => {
            let deployment: Deployment = decode_row(cursor)?;
            inner
                .deployments_by_job
                .entry((deployment.namespace.clone(), deployment.job_id.clone()))
                .or_default()
                .insert(deployment.id.clone());
            inner
                .deployments
                .insert(deployment.id.clone(), Arc::new(deployment));
        }
        TableId::AclPolicies => {
            let policy: AclPolicy = decode_row(cursor)?;
            inner
                .acl_policies
                .insert(policy.name.clone(), Arc::new(policy));
        }
        TableId::AclRoles => {
            let role: AclRole = decode_row(cursor)?;
            inner
                .acl_roles_by_name
                .insert(role.name.clone(), role.id.clone());
            inner.acl_roles.insert(role.id.clone(), Arc::new(role));
        }
        TableId::AclTokens => {
            let token: AclToken = decode_row(cursor)?;
            inner.acl_tokens_by_secret.insert(
                crate::core::model::acl::hash_secret(&token.secret_id),
                token.accessor_id.clone(),
            );
            inner
                .acl_tokens
                .insert(token.accessor_id.clone(), Arc::new(token));
        }
        TableId::Namespaces => {
            let namespace: Namespace = decode_row(cursor)?;
            inner
                .namespaces
                .insert(namespace.name.clone(), Arc::new(namespace));
        }
        TableId::Services => {
            let service: ServiceRegistration = decode_row(cursor)?;
            let key = (
                service.namespace.clone(),
                service.service_name.clone(),
                service.id.clone(),
            );
            inner.services_by_id.insert(service.id.clone(), key.clone());
            if !service.alloc_id.is_empty() {
                inner
                    .services_by_alloc
                    .entry(service.alloc_id.clone())
                    .or_default()
                    .push(key.clone());
            }
            inner.services.insert(key, Arc::new(service));
        }
        TableId::RootKeys => {
            let meta: RootKeyMeta = decode_row(cursor)?;
            inner.root_keys.insert(meta.id.clone(), Arc::new(meta));
        }
        TableId::VolumeClaims => {
            let claim: TaskGroupHostVolumeClaim = decode_row(cursor)?;
            let key = (
                claim.namespace.clone(),
                claim.job_id.clone(),
                claim.task_group_name.clone(),
                claim.volume_name.clone(),
            );
            inner.volume_claims_by_id.insert(claim.id.clone(), key.clone());
            inner.volume_claims.insert(key, Arc::new(claim));
        }
    }
    Ok(())
}

impl super::StateStore {
    /// Serializes a consistent snapshot of all tables.
    pub fn persist_snapshot(&self) -> Result<Bytes, FlotillaError> {
        let snapshot = self.snapshot();
        persist(&snapshot.inner)
    }

    /// Atomically replaces the store contents from a snapshot image.
    pub fn restore_snapshot(&self, data: Bytes) -> Result<(), FlotillaError> {
        let inner = restore(data)?;
        self.replace(inner);
        Ok(())
    }
}
