use aws_sdk_lambda::types::InvocationType;
use docflow_core::coordinator::StageInvoker;

use super::block_on;

/// Fire-and-forget invocation of the next stage's function.
pub struct AwsLambdaStageInvoker {
    lambda_client: aws_sdk_lambda::Client,
}

impl AwsLambdaStageInvoker {
    pub fn new(lambda_client: aws_sdk_lambda::Client) -> Self {
        Self { lambda_client }
    }
}

impl StageInvoker for AwsLambdaStageInvoker {
    fn invoke_stage(&self, function_name: &str, payload: &[u8]) -> Result<(), String> {
        let request_payload = payload.to_vec();
        let client = self.lambda_client.clone();
        let function_name = function_name.to_string();

        block_on(async move {
            client
                .invoke()
                .function_name(function_name.clone())
                .invocation_type(InvocationType::Event)
                .set_payload(Some(request_payload.into()))
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to invoke {function_name}: {error}"))
        })
    }
}
