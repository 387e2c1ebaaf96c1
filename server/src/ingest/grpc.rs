//! OTLP gRPC receivers
//!
//! `TraceService.Export` and `LogsService.Export` on one port, per OTLP v1,
//! with gzip transport compression accepted. Handlers return `OK` as soon as
//! admitted records are enqueued; they never wait on storage or broadcast.
//! Malformed protobuf is rejected by the transport before the handlers run.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tonic::codec::CompressionEncoding;
use tonic::transport::Server as TonicServer;
use tonic::{Request, Response, Status};

use opentelemetry_proto::tonic::collector::{
    logs::v1::{
        logs_service_server::{LogsService, LogsServiceServer},
        ExportLogsServiceRequest, ExportLogsServiceResponse,
    },
    trace::v1::{
        trace_service_server::{TraceService, TraceServiceServer},
        ExportTraceServiceRequest, ExportTraceServiceResponse,
    },
};

use super::IngestPipeline;
use crate::core::constants::OTLP_BODY_LIMIT;

pub struct OtlpGrpcServer {
    addr: SocketAddr,
    pipeline: Arc<IngestPipeline>,
}

impl OtlpGrpcServer {
    pub fn new(host: &str, port: u16, pipeline: Arc<IngestPipeline>) -> Result<Self> {
        let addr = SocketAddr::new(host.parse()?, port);
        Ok(Self { addr, pipeline })
    }

    pub async fn start(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let addr = self.addr;

        tracing::debug!(%addr, "Starting OTLP gRPC server");

        TonicServer::builder()
            .add_service(
                TraceServiceServer::new(OtlpTraceService {
                    pipeline: Arc::clone(&self.pipeline),
                })
                .accept_compressed(CompressionEncoding::Gzip)
                .max_decoding_message_size(OTLP_BODY_LIMIT),
            )
            .add_service(
                LogsServiceServer::new(OtlpLogsService {
                    pipeline: self.pipeline,
                })
                .accept_compressed(CompressionEncoding::Gzip)
                .max_decoding_message_size(OTLP_BODY_LIMIT),
            )
            .serve_with_shutdown(addr, async move {
                let _ = shutdown_rx.wait_for(|&v| v).await;
                tracing::debug!("OTLP gRPC server shutting down");
            })
            .await?;

        Ok(())
    }
}

/// gRPC trace service
struct OtlpTraceService {
    pipeline: Arc<IngestPipeline>,
}

#[tonic::async_trait]
impl TraceService for OtlpTraceService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let request = request.into_inner();
        let admitted = self.pipeline.ingest_traces(&request);
        tracing::trace!(admitted, "Trace export processed");

        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

/// gRPC logs service
struct OtlpLogsService {
    pipeline: Arc<IngestPipeline>,
}

#[tonic::async_trait]
impl LogsService for OtlpLogsService {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        let request = request.into_inner();
        let admitted = self.pipeline.ingest_logs(&request);
        tracing::trace!(admitted, "Logs export processed");

        Ok(Response::new(ExportLogsServiceResponse {
            partial_success: None,
        }))
    }
}
