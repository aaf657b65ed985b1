use crate::{
    aws::{
        iam::{service_trust_policy, Role},
        lambda::{Function, FunctionPermission},
        Aws,
    },
    Error, Store,
};

use super::{Env, Posture, Scenario, Target};

const BASIC_EXECUTION_ROLE: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// A function anyone may invoke.
///
/// The function code comes from the archive at `LAMBDA_ZIP_PATH`, remediation
/// removes the public statement from its resource policy.
pub struct LambdaPublicAccess;

impl Scenario for LambdaPublicAccess {
    fn rule(&self) -> &'static str {
        "lambda-function-public-access-prohibited"
    }

    fn summary(&self) -> &'static str {
        "Lambda function whose resource policy allows public invocation"
    }

    fn declare(
        &self,
        env: &Env,
        store: &mut Store<Aws>,
        posture: Posture,
    ) -> Result<Vec<Target>, Error> {
        let settings = &env.settings;
        let rule = self.rule();
        let zip_path = settings.require_lambda_zip_path()?;
        let role = store.resource(
            "execution-role",
            Role {
                name: settings.name(rule, "role", 64),
                assume_role_policy: service_trust_policy("lambda.amazonaws.com"),
                policies: Default::default(),
                managed_policy_arns: vec![BASIC_EXECUTION_ROLE.to_owned()],
                tags: settings.tags(rule),
            },
        )?;
        let function = store.resource(
            "function",
            Function::new(
                settings.name(rule, "fn", 64),
                role.remote(|r| r.arn.clone()),
                zip_path,
                settings.tags(rule),
            )?,
        )?;
        if !posture.is_compliant() {
            store.resource(
                "public-invoke",
                FunctionPermission::public_invoke(function.remote(|f| f.name.clone())),
            )?;
        }
        Ok(vec![Target::new(
            "AWS::Lambda::Function",
            function.remote(|f| f.name.clone()),
        )])
    }
}
