//! Object store over chart releases

use async_trait::async_trait;
use tenant_common::{ApiErrorKind, Error, Result};
use tenant_reconcile::{ManagedObject, ObjectKey, ObjectStore, ProviderMetadata};

use super::{
    ChartRef, ChartTransport, ReleaseClient, ReleaseRecord, ReleaseRecords, ReleaseRequest,
    ReleaseValues,
};

/// [`ObjectStore`] managing releases of one chart
///
/// Existence is always decided from release records, so create, update and
/// delete report AlreadyExists and NotFound like any other store.
pub struct HelmReleaseStore {
    records: Box<dyn ReleaseRecords>,
    client: Box<dyn ReleaseClient>,
    transport: Box<dyn ChartTransport>,
    chart: ChartRef,
}

impl HelmReleaseStore {
    /// Store installing `chart`
    pub fn new(
        records: Box<dyn ReleaseRecords>,
        client: Box<dyn ReleaseClient>,
        transport: Box<dyn ChartTransport>,
        chart: ChartRef,
    ) -> Self {
        Self {
            records,
            client,
            transport,
            chart,
        }
    }

    async fn find(&self, key: &ObjectKey) -> Result<Option<ReleaseRecord>> {
        let records = self
            .records
            .list(&key.namespace, &format!("name={}", key.name))
            .await?;
        Ok(records.into_iter().find(|r| r.name == key.name))
    }

    async fn read(&self, record: ReleaseRecord) -> Result<ManagedObject<ReleaseValues>> {
        let values = self.client.values(&record.namespace, &record.name).await?;
        Ok(ManagedObject::new(
            ObjectKey::new(record.namespace, record.name),
            ReleaseValues(values),
        )
        .with_labels(record.labels)
        .with_provider_metadata(ProviderMetadata {
            resource_version: Some(record.revision.to_string()),
            version: None,
            status: Some(record.status),
        }))
    }

    /// Stage the chart, run `write`, and release the staged chart either way
    async fn staged_write(&self, object: &ManagedObject<ReleaseValues>, upgrade: bool) -> Result<()> {
        let staged = self.transport.stage(&self.chart).await?;
        let request = ReleaseRequest {
            name: object.name().to_string(),
            namespace: object.namespace().to_string(),
            chart: staged.path().to_path_buf(),
            values: object.payload.0.clone(),
            labels: object.labels.clone(),
        };
        let result = if upgrade {
            self.client.upgrade(&request).await
        } else {
            self.client.install(&request).await
        };
        staged.release();
        result
    }
}

#[async_trait]
impl ObjectStore<ReleaseValues> for HelmReleaseStore {
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<ManagedObject<ReleaseValues>>> {
        let mut objects = Vec::new();
        for record in self.records.list(namespace, selector).await? {
            objects.push(self.read(record).await?);
        }
        Ok(objects)
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject<ReleaseValues>>> {
        match self.find(key).await? {
            Some(record) => Ok(Some(self.read(record).await?)),
            None => Ok(None),
        }
    }

    async fn create(&self, object: &ManagedObject<ReleaseValues>) -> Result<()> {
        if self.find(&object.key).await?.is_some() {
            return Err(Error::store(
                format!("install release {}", object.key),
                ApiErrorKind::AlreadyExists,
                "release already exists",
            ));
        }
        self.staged_write(object, false).await
    }

    async fn update(
        &self,
        current: &ManagedObject<ReleaseValues>,
        desired: &ManagedObject<ReleaseValues>,
    ) -> Result<()> {
        if self.find(&current.key).await?.is_none() {
            return Err(Error::store(
                format!("upgrade release {}", current.key),
                ApiErrorKind::NotFound,
                "release not found",
            ));
        }
        let mut target = desired.clone();
        target.key = current.key.clone();
        self.staged_write(&target, true).await
    }

    async fn delete(&self, object: &ManagedObject<ReleaseValues>) -> Result<()> {
        if self.find(&object.key).await?.is_none() {
            return Err(Error::store(
                format!("uninstall release {}", object.key),
                ApiErrorKind::NotFound,
                "release not found",
            ));
        }
        self.client.uninstall(object.namespace(), object.name()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{MockChartTransport, MockReleaseClient, MockReleaseRecords, StagedChart};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn chart() -> ChartRef {
        ChartRef {
            repository: "https://charts.example.com".to_string(),
            chart: "chart-operator-chart".to_string(),
            version: None,
        }
    }

    fn record(revision: u32) -> ReleaseRecord {
        ReleaseRecord {
            name: "chart-operator".to_string(),
            namespace: "kube-system".to_string(),
            revision,
            status: "deployed".to_string(),
            labels: BTreeMap::from([("tenant.dev/managed-by".to_string(), "tenant-operator".to_string())]),
        }
    }

    fn release(values: serde_json::Value) -> ManagedObject<ReleaseValues> {
        ManagedObject::new(
            ObjectKey::new("kube-system", "chart-operator"),
            ReleaseValues(values),
        )
        .with_label("tenant.dev/managed-by", "tenant-operator")
    }

    fn records_with(found: Option<ReleaseRecord>) -> MockReleaseRecords {
        let mut records = MockReleaseRecords::new();
        records
            .expect_list()
            .returning(move |_, _| Ok(found.clone().into_iter().collect()));
        records
    }

    /// Transport handing out one staged chart in a real temp directory
    fn transport_staging(dir: TempDir) -> MockChartTransport {
        let mut transport = MockChartTransport::new();
        let mut dir = Some(dir);
        transport.expect_stage().times(1).returning(move |_| {
            let dir = dir.take().ok_or_else(|| Error::internal("staged twice"))?;
            let path = dir.path().join("chart-operator-chart-0.3.0.tgz");
            Ok(StagedChart::new(path, dir))
        });
        transport
    }

    #[tokio::test]
    async fn test_list_reads_values_and_revision() {
        let records = records_with(Some(record(4)));
        let mut client = MockReleaseClient::new();
        client
            .expect_values()
            .times(1)
            .returning(|_, _| Ok(serde_json::json!({"clusterDNSIP": "172.31.0.10"})));
        let store = HelmReleaseStore::new(
            Box::new(records),
            Box::new(client),
            Box::new(MockChartTransport::new()),
            chart(),
        );

        let objects = store.list("kube-system", "tenant.dev/managed-by=tenant-operator").await.unwrap();

        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].payload.0["clusterDNSIP"], "172.31.0.10");
        assert_eq!(objects[0].resource_version(), Some("4"));
        assert_eq!(
            objects[0].provider_metadata.as_ref().and_then(|m| m.status.as_deref()),
            Some("deployed")
        );
    }

    #[tokio::test]
    async fn test_install_releases_staged_chart_even_on_failure() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().to_path_buf();
        let mut client = MockReleaseClient::new();
        client.expect_install().times(1).returning(|request| {
            assert!(request.chart.ends_with("chart-operator-chart-0.3.0.tgz"));
            assert_eq!(request.labels.len(), 1);
            Err(Error::store("helm install", ApiErrorKind::Other, "boom"))
        });
        let store = HelmReleaseStore::new(
            Box::new(records_with(None)),
            Box::new(client),
            Box::new(transport_staging(dir)),
            chart(),
        );

        let err = store.create(&release(serde_json::json!({}))).await.unwrap_err();

        assert_eq!(err.api_kind(), Some(ApiErrorKind::Other));
        assert!(!location.exists());
    }

    #[tokio::test]
    async fn test_create_of_existing_release_is_already_exists() {
        let store = HelmReleaseStore::new(
            Box::new(records_with(Some(record(1)))),
            Box::new(MockReleaseClient::new()),
            Box::new(MockChartTransport::new()),
            chart(),
        );

        let err = store.create(&release(serde_json::json!({}))).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_upgrade_and_uninstall_of_missing_release_are_not_found() {
        let store = HelmReleaseStore::new(
            Box::new(records_with(None)),
            Box::new(MockReleaseClient::new()),
            Box::new(MockChartTransport::new()),
            chart(),
        );
        let object = release(serde_json::json!({}));

        assert!(store.update(&object, &object).await.unwrap_err().is_not_found());
        assert!(store.delete(&object).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_upgrade_stages_and_upgrades() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().to_path_buf();
        let mut client = MockReleaseClient::new();
        client.expect_upgrade().times(1).returning(|request| {
            assert_eq!(request.values["image"]["registry"], "quay.io");
            Ok(())
        });
        let store = HelmReleaseStore::new(
            Box::new(records_with(Some(record(2)))),
            Box::new(client),
            Box::new(transport_staging(dir)),
            chart(),
        );

        store
            .update(
                &release(serde_json::json!({})),
                &release(serde_json::json!({"image": {"registry": "quay.io"}})),
            )
            .await
            .unwrap();
        assert!(!location.exists());
    }

    #[tokio::test]
    async fn test_unreachable_tenant_surfaces_from_records() {
        let mut records = MockReleaseRecords::new();
        records
            .expect_list()
            .returning(|_, _| Err(Error::store("list releases", ApiErrorKind::Unavailable, "connection refused")));
        // No Helm call is expected at all
        let store = HelmReleaseStore::new(
            Box::new(records),
            Box::new(MockReleaseClient::new()),
            Box::new(MockChartTransport::new()),
            chart(),
        );

        let err = store.create(&release(serde_json::json!({}))).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_staged_chart_path_is_passed_through() {
        let staged = StagedChart::at(PathBuf::from("/charts/a.tgz"));
        assert_eq!(staged.path(), PathBuf::from("/charts/a.tgz").as_path());
    }
}
